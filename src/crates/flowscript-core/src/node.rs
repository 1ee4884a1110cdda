//! Node contract: metadata, execution context, and lazy edge maps
//!
//! A node is a stateless singleton. `execute` receives the execution's state
//! document, its interpolated config, and the runtime context, and returns an
//! [`EdgeMap`]: named outgoing edges whose payloads are produced lazily — the
//! interpreter invokes at most one producer per call, so unselected edges pay
//! no cost.

use crate::context::RuntimeContext;
use crate::error::Result;
use crate::state::StateStore;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Edge selected by the `exit` control signal
pub const EDGE_EXIT: &str = "exit";
/// Edge that carries a node failure as data
pub const EDGE_ERROR: &str = "error";
/// Default success edge
pub const EDGE_NEXT: &str = "next";
/// Loop controller edge requesting another iteration
pub const EDGE_NEXT_ITERATION: &str = "next_iteration";
/// Loop controller edge ending the loop
pub const EDGE_EXIT_LOOP: &str = "exit_loop";
/// Prefix of intra-frame jump edges (`loopTo:<node name>`)
pub const EDGE_LOOP_TO_PREFIX: &str = "loopTo:";

/// Category a node belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Performs work and advances
    Action,
    /// Steers the interpreter (loop controllers, branch conditions)
    Control,
    /// Pauses for human input
    Human,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeKind::Action => "action",
            NodeKind::Control => "control",
            NodeKind::Human => "human",
        };
        f.write_str(s)
    }
}

/// Static description of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Registered name, referenced by workflow documents
    pub name: String,
    /// Human description
    pub description: String,
    /// Node category
    pub kind: NodeKind,
    /// Edge names the node may return
    pub edges: Vec<String>,
    /// Free-form hints for external renderers
    #[serde(default)]
    pub hints: Value,
}

impl NodeMetadata {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind,
            edges: Vec::new(),
            hints: Value::Null,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_edges<I, S>(mut self, edges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.edges = edges.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_hints(mut self, hints: Value) -> Self {
        self.hints = hints;
        self
    }
}

/// Everything a node sees during one `execute` call
pub struct NodeContext<'a> {
    /// The execution's state document
    pub state: &'a mut StateStore,
    /// Interpolated node config (empty object for bare references)
    pub config: Value,
    /// Runtime façade for events and pause/resume
    pub runtime: &'a RuntimeContext,
    /// Per-dispatch node id
    pub node_id: &'a str,
}

/// Lazy producer of an edge payload
pub type EdgeProducer = Box<dyn FnOnce() -> Option<Value> + Send>;

/// Ordered map of outgoing edges. The interpreter selects the first entry.
#[derive(Default)]
pub struct EdgeMap {
    edges: IndexMap<String, EdgeProducer>,
}

impl std::fmt::Debug for EdgeMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.edges.keys()).finish()
    }
}

impl EdgeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map with a single edge and payload producer
    pub fn single<F>(edge: impl Into<String>, producer: F) -> Self
    where
        F: FnOnce() -> Option<Value> + Send + 'static,
    {
        Self::new().with_edge(edge, producer)
    }

    /// Map with a single payload-less edge
    pub fn signal(edge: impl Into<String>) -> Self {
        Self::single(edge, || None)
    }

    /// The conventional `next` edge with no payload
    pub fn next() -> Self {
        Self::signal(EDGE_NEXT)
    }

    pub fn with_edge<F>(mut self, edge: impl Into<String>, producer: F) -> Self
    where
        F: FnOnce() -> Option<Value> + Send + 'static,
    {
        self.edges.insert(edge.into(), Box::new(producer));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Edge names in insertion order
    pub fn edge_names(&self) -> Vec<&str> {
        self.edges.keys().map(String::as_str).collect()
    }

    /// Consume the map, yielding the first edge and its producer
    pub(crate) fn take_first(self) -> Option<(String, EdgeProducer)> {
        self.edges.into_iter().next()
    }
}

/// The node execution contract.
///
/// Nodes are registered once per process and must be stateless: any
/// per-execution data belongs in the state document.
#[async_trait]
pub trait Node: Send + Sync {
    /// Static metadata for this node
    fn metadata(&self) -> &NodeMetadata;

    /// Run the node against the execution's state.
    ///
    /// Must not recursively invoke the interpreter. Auxiliary tasks may
    /// outlive this call but must not mutate state after it returns.
    async fn execute<'a>(&self, ctx: NodeContext<'a>) -> Result<EdgeMap>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_edge_map_preserves_insertion_order() {
        let map = EdgeMap::new()
            .with_edge("high", || Some(json!(1)))
            .with_edge("low", || Some(json!(2)));
        assert_eq!(map.edge_names(), vec!["high", "low"]);
    }

    #[test]
    fn test_take_first_selects_first_inserted() {
        let map = EdgeMap::new()
            .with_edge("chosen", || Some(json!("payload")))
            .with_edge("ignored", || panic!("unselected producer must not run"));

        let (edge, producer) = map.take_first().unwrap();
        assert_eq!(edge, "chosen");
        assert_eq!(producer(), Some(json!("payload")));
    }

    #[test]
    fn test_empty_edge_map() {
        let map = EdgeMap::new();
        assert!(map.is_empty());
        assert!(map.take_first().is_none());
    }

    #[test]
    fn test_signal_edge_has_no_payload() {
        let (edge, producer) = EdgeMap::next().take_first().unwrap();
        assert_eq!(edge, EDGE_NEXT);
        assert_eq!(producer(), None);
    }

    #[test]
    fn test_metadata_builder() {
        let meta = NodeMetadata::new("approve", NodeKind::Human)
            .with_description("asks a human")
            .with_edges(["approved", "rejected"])
            .with_hints(json!({"icon": "hand"}));

        assert_eq!(meta.name, "approve");
        assert_eq!(meta.kind, NodeKind::Human);
        assert_eq!(meta.edges, vec!["approved", "rejected"]);
        assert_eq!(meta.hints["icon"], json!("hand"));
    }
}
