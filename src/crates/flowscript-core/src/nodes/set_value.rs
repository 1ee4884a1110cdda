//! `setValue` write-through node

use crate::error::{FlowError, Result};
use crate::node::{EdgeMap, Node, NodeContext, NodeKind, NodeMetadata, EDGE_NEXT};
use async_trait::async_trait;
use serde_json::Value;

/// Writes a configured value to a state path.
///
/// Config: `{"path": "<path>", "value": <any JSON>}`. The value may contain
/// `{{path}}` placeholders; they are interpolated before this node runs.
pub struct SetValueNode {
    metadata: NodeMetadata,
}

impl SetValueNode {
    pub fn new() -> Self {
        Self {
            metadata: NodeMetadata::new("setValue", NodeKind::Action)
                .with_description("writes a value to a state path")
                .with_edges([EDGE_NEXT]),
        }
    }
}

impl Default for SetValueNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for SetValueNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn execute<'a>(&self, ctx: NodeContext<'a>) -> Result<EdgeMap> {
        let path = ctx
            .config
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FlowError::NodeFailed {
                node: self.metadata.name.clone(),
                message: "config requires a 'path' string".to_string(),
            })?;
        let value = ctx.config.get("value").cloned().unwrap_or(Value::Null);

        ctx.state.set(path, value)?;
        Ok(EdgeMap::next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context_with_sink;
    use crate::state::StateStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_writes_value_and_advances() {
        let (ctx, _sink) = context_with_sink();
        let mut state = StateStore::new();
        let node = SetValueNode::new();

        let edges = node
            .execute(NodeContext {
                state: &mut state,
                config: json!({"path": "user.name", "value": "alice"}),
                runtime: &ctx,
                node_id: "setValue-1",
            })
            .await
            .unwrap();

        assert_eq!(edges.take_first().unwrap().0, EDGE_NEXT);
        assert_eq!(state.get("user.name").unwrap(), Some(json!("alice")));
    }

    #[tokio::test]
    async fn test_missing_path_fails() {
        let (ctx, _sink) = context_with_sink();
        let mut state = StateStore::new();
        let node = SetValueNode::new();

        let result = node
            .execute(NodeContext {
                state: &mut state,
                config: json!({"value": 1}),
                runtime: &ctx,
                node_id: "setValue-1",
            })
            .await;
        assert!(matches!(result, Err(FlowError::NodeFailed { .. })));
    }
}
