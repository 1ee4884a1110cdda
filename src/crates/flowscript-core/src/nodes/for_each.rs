//! `forEach` loop controller

use crate::error::{FlowError, Result};
use crate::node::{
    EdgeMap, Node, NodeContext, NodeKind, NodeMetadata, EDGE_EXIT_LOOP, EDGE_NEXT_ITERATION,
};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Loop controller that walks an array in state.
///
/// Config: `{"items": "<path>", "itemVar"?: "<key>", "indexVar"?: "<key>"}`.
/// Each `next_iteration` publishes the current element under `itemVar`
/// (default `item`) and its position under `indexVar` (default `index`).
/// An absent or non-array `items` path ends the loop immediately.
///
/// The node is a stateless singleton, so the iteration cursor lives in the
/// state document under an internal key scoped by the items path.
pub struct ForEachNode {
    metadata: NodeMetadata,
}

impl ForEachNode {
    pub fn new() -> Self {
        Self {
            metadata: NodeMetadata::new("forEach", NodeKind::Control)
                .with_description("repeats the loop body once per element of an array in state")
                .with_edges([EDGE_NEXT_ITERATION, EDGE_EXIT_LOOP]),
        }
    }
}

impl Default for ForEachNode {
    fn default() -> Self {
        Self::new()
    }
}

fn cursor_path(items_path: &str) -> String {
    format!("__forEach.{}", items_path.replace('.', "_").replace(['[', ']'], "_"))
}

#[async_trait]
impl Node for ForEachNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn execute<'a>(&self, ctx: NodeContext<'a>) -> Result<EdgeMap> {
        let items_path = ctx
            .config
            .get("items")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FlowError::NodeFailed {
                node: self.metadata.name.clone(),
                message: "config requires an 'items' path".to_string(),
            })?
            .to_string();
        let item_var = ctx
            .config
            .get("itemVar")
            .and_then(|v| v.as_str())
            .unwrap_or("item")
            .to_string();
        let index_var = ctx
            .config
            .get("indexVar")
            .and_then(|v| v.as_str())
            .unwrap_or("index")
            .to_string();

        let items = match ctx.state.get(&items_path)? {
            Some(Value::Array(items)) => items,
            _ => return Ok(EdgeMap::signal(EDGE_EXIT_LOOP)),
        };

        let cursor = cursor_path(&items_path);
        let position = ctx
            .state
            .get(&cursor)?
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;

        if position >= items.len() {
            // Reset so a later loop over the same path starts fresh.
            ctx.state.set(&cursor, Value::Null)?;
            return Ok(EdgeMap::signal(EDGE_EXIT_LOOP));
        }

        ctx.state.set(&item_var, items[position].clone())?;
        ctx.state.set(&index_var, json!(position))?;
        ctx.state.set(&cursor, json!(position + 1))?;
        Ok(EdgeMap::signal(EDGE_NEXT_ITERATION))
    }
}
