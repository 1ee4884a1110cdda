//! `whileCondition` loop controller

use crate::error::{FlowError, Result};
use crate::node::{
    EdgeMap, Node, NodeContext, NodeKind, NodeMetadata, EDGE_EXIT_LOOP, EDGE_NEXT_ITERATION,
};
use crate::expression;
use async_trait::async_trait;

/// Loop controller driven by a restricted expression over state.
///
/// Config: `{"condition": "<expression>"}`. Returns `next_iteration` while
/// the condition is truthy, `exit_loop` once it is not.
pub struct WhileConditionNode {
    metadata: NodeMetadata,
}

impl WhileConditionNode {
    pub fn new() -> Self {
        Self {
            metadata: NodeMetadata::new("whileCondition", NodeKind::Control)
                .with_description("repeats the loop body while a condition over state holds")
                .with_edges([EDGE_NEXT_ITERATION, EDGE_EXIT_LOOP]),
        }
    }
}

impl Default for WhileConditionNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for WhileConditionNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn execute<'a>(&self, ctx: NodeContext<'a>) -> Result<EdgeMap> {
        let condition = ctx
            .config
            .get("condition")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FlowError::NodeFailed {
                node: self.metadata.name.clone(),
                message: "config requires a 'condition' string".to_string(),
            })?;

        let edge = if expression::evaluate_bool(condition, ctx.state)? {
            EDGE_NEXT_ITERATION
        } else {
            EDGE_EXIT_LOOP
        };
        Ok(EdgeMap::signal(edge))
    }
}
