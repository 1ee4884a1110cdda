//! Process-wide node registry
//!
//! Pure data: name → node singleton, plus a kind index. The registry does no
//! scheduling. Handing a fresh `Arc<NodeRegistry>` to each manager keeps test
//! harnesses isolated — there is no hidden static table.

use crate::node::{Node, NodeKind};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Registry of node singletons, indexed by name and kind
#[derive(Default)]
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, Arc<dyn Node>>>,
    kinds: RwLock<HashMap<NodeKind, Vec<String>>>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.names())
            .finish()
    }
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-loaded with the built-in control nodes
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for node in crate::nodes::builtin_nodes() {
            registry.register(node);
        }
        registry
    }

    /// Register a node instance. A duplicate name replaces the prior
    /// registration with a warning.
    pub fn register(&self, node: Arc<dyn Node>) {
        let name = node.metadata().name.clone();
        let kind = node.metadata().kind;

        let mut nodes = self.nodes.write().unwrap();
        let mut kinds = self.kinds.write().unwrap();
        if let Some(previous) = nodes.insert(name.clone(), node) {
            warn!(node = %name, "replacing previously registered node");
            if let Some(names) = kinds.get_mut(&previous.metadata().kind) {
                names.retain(|n| n != &name);
            }
        }
        kinds.entry(kind).or_default().push(name);
    }

    /// Register via a zero-argument factory
    pub fn register_factory<F>(&self, factory: F)
    where
        F: FnOnce() -> Arc<dyn Node>,
    {
        self.register(factory());
    }

    /// Look up a node by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Node>> {
        self.nodes.read().unwrap().get(name).cloned()
    }

    /// Whether a node with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.read().unwrap().contains_key(name)
    }

    /// All registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of all nodes of the given kind, sorted
    pub fn by_kind(&self, kind: NodeKind) -> Vec<String> {
        let mut names = self
            .kinds
            .read()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Number of registered nodes
    pub fn len(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().unwrap().is_empty()
    }
}
