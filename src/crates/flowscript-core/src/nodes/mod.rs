//! Built-in nodes
//!
//! The control nodes the interpreter's loop construct is built around, plus
//! the `setValue` write-through node. Everything here is stateless: loop
//! cursors live in the state document, never in the node.

mod for_each;
mod set_value;
mod while_condition;

pub use for_each::ForEachNode;
pub use set_value::SetValueNode;
pub use while_condition::WhileConditionNode;

use crate::node::Node;
use std::sync::Arc;

/// The nodes registered by [`NodeRegistry::with_builtins`]
///
/// [`NodeRegistry::with_builtins`]: crate::registry::NodeRegistry::with_builtins
pub fn builtin_nodes() -> Vec<Arc<dyn Node>> {
    vec![
        Arc::new(WhileConditionNode::new()),
        Arc::new(ForEachNode::new()),
        Arc::new(SetValueNode::new()),
    ]
}
