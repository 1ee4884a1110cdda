//! Path-addressed mutable state document
//!
//! Every execution owns exactly one [`StateStore`]: a JSON object that nodes
//! read and mutate as the workflow advances. Reads deep-clone so callers can
//! never alias a shared subtree; writes mutate in place and fire the
//! registered pre/post mutation hooks.
//!
//! Paths accept dotted keys with bracketed array indices, with an optional
//! `$.` or `state.` prefix:
//!
//! ```text
//! user.name        $.user.name        state.user.name
//! cart.items[2]    $.cart.items[2].sku
//! ```

use crate::error::{FlowError, Result};
use serde_json::{Map, Value};
use tracing::warn;

/// One segment of a parsed state path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object key
    Key(String),
    /// Array index
    Index(usize),
}

/// Parse a dotted/bracketed path into segments.
///
/// A leading `$.` or `state.` prefix is stripped; a bare `$` addresses the
/// document root and parses to an empty segment list.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    let invalid = |message: &str| FlowError::InvalidPath {
        path: path.to_string(),
        message: message.to_string(),
    };

    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty path"));
    }
    if trimmed == "$" {
        return Ok(Vec::new());
    }

    let rest = trimmed
        .strip_prefix("$.")
        .or_else(|| trimmed.strip_prefix("state."))
        .unwrap_or(trimmed);
    if rest.is_empty() {
        return Err(invalid("empty path after prefix"));
    }

    let mut segments = Vec::new();
    for part in rest.split('.') {
        if part.is_empty() {
            return Err(invalid("empty segment"));
        }

        // Split a part like `items[2][0]` into its key and trailing indices.
        let key_end = part.find('[').unwrap_or(part.len());
        let key = &part[..key_end];
        if key.is_empty() {
            return Err(invalid("index without key"));
        }
        if key.contains(']') {
            return Err(invalid("unmatched ']'"));
        }
        segments.push(PathSegment::Key(key.to_string()));

        let mut remainder = &part[key_end..];
        while !remainder.is_empty() {
            let close = remainder.find(']').ok_or_else(|| invalid("unclosed '['"))?;
            if !remainder.starts_with('[') {
                return Err(invalid("malformed index"));
            }
            let digits = &remainder[1..close];
            let index: usize = digits
                .parse()
                .map_err(|_| invalid("index must be an unsigned integer"))?;
            segments.push(PathSegment::Index(index));
            remainder = &remainder[close + 1..];
        }
    }

    Ok(segments)
}

/// Description of a single mutation, handed to state hooks
#[derive(Debug, Clone)]
pub struct StateChange {
    /// The path being written (`$` for root-level merges)
    pub path: String,
    /// The value being written
    pub value: Value,
}

/// Hook fired around every mutation. A hook error is logged and the mutation
/// still applies.
pub type StateHook = Box<dyn Fn(&StateChange) -> std::result::Result<(), String> + Send + Sync>;

/// Mutable JSON state document owned by a single execution
pub struct StateStore {
    doc: Map<String, Value>,
    pre_hooks: Vec<StateHook>,
    post_hooks: Vec<StateHook>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("doc", &self.doc)
            .field("pre_hooks", &self.pre_hooks.len())
            .field("post_hooks", &self.post_hooks.len())
            .finish()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Create an empty state document
    pub fn new() -> Self {
        Self {
            doc: Map::new(),
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
        }
    }

    /// Create a state document seeded from an initial JSON object
    pub fn from_initial(initial: Value) -> Result<Self> {
        match initial {
            Value::Object(doc) => Ok(Self {
                doc,
                pre_hooks: Vec::new(),
                post_hooks: Vec::new(),
            }),
            Value::Null => Ok(Self::new()),
            other => Err(FlowError::State(format!(
                "initial state must be an object, got {}",
                value_type(&other)
            ))),
        }
    }

    /// Read the value at `path`, deep-cloned.
    ///
    /// Returns `None` for an absent path, which is distinct from a stored
    /// `null`.
    pub fn get(&self, path: &str) -> Result<Option<Value>> {
        let segments = parse_path(path)?;
        if segments.is_empty() {
            return Ok(Some(self.snapshot()));
        }

        let mut current = match &segments[0] {
            PathSegment::Key(key) => match self.doc.get(key) {
                Some(v) => v,
                None => return Ok(None),
            },
            PathSegment::Index(_) => {
                return Err(FlowError::InvalidPath {
                    path: path.to_string(),
                    message: "path cannot start with an index".to_string(),
                })
            }
        };

        for segment in &segments[1..] {
            current = match (segment, current) {
                (PathSegment::Key(key), Value::Object(map)) => match map.get(key) {
                    Some(v) => v,
                    None => return Ok(None),
                },
                (PathSegment::Index(i), Value::Array(items)) => match items.get(*i) {
                    Some(v) => v,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            };
        }

        Ok(Some(current.clone()))
    }

    /// Write `value` at `path`, creating intermediate containers as needed.
    ///
    /// Writing past the end of an array pads it with nulls; writing through a
    /// scalar replaces it with a fresh container.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let segments = parse_path(path)?;
        if segments.is_empty() {
            return Err(FlowError::InvalidPath {
                path: path.to_string(),
                message: "cannot set the document root; use update".to_string(),
            });
        }

        let root = match &segments[0] {
            PathSegment::Key(key) => key.clone(),
            PathSegment::Index(_) => {
                return Err(FlowError::InvalidPath {
                    path: path.to_string(),
                    message: "path cannot start with an index".to_string(),
                })
            }
        };

        let change = StateChange {
            path: path.to_string(),
            value: value.clone(),
        };
        fire_hooks(&self.pre_hooks, &change, "pre");

        let mut current: &mut Value = self.doc.entry(root).or_insert(Value::Null);

        for segment in &segments[1..] {
            match segment {
                PathSegment::Key(key) => {
                    if !current.is_object() {
                        *current = Value::Object(Map::new());
                    }
                    current = match current {
                        Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                        other => other,
                    };
                }
                PathSegment::Index(i) => {
                    if !current.is_array() {
                        *current = Value::Array(Vec::new());
                    }
                    current = match current {
                        Value::Array(items) => {
                            if items.len() <= *i {
                                items.resize(*i + 1, Value::Null);
                            }
                            &mut items[*i]
                        }
                        other => other,
                    };
                }
            }
        }
        *current = value;

        fire_hooks(&self.post_hooks, &change, "post");
        Ok(())
    }

    /// Shallow-merge an object into the document root
    pub fn update(&mut self, partial: Value) -> Result<()> {
        let entries = match partial {
            Value::Object(map) => map,
            other => {
                return Err(FlowError::State(format!(
                    "update requires an object, got {}",
                    value_type(&other)
                )))
            }
        };

        let change = StateChange {
            path: "$".to_string(),
            value: Value::Object(entries.clone()),
        };
        fire_hooks(&self.pre_hooks, &change, "pre");

        for (key, value) in entries {
            self.doc.insert(key, value);
        }

        fire_hooks(&self.post_hooks, &change, "post");
        Ok(())
    }

    /// Deep-cloned snapshot of the full document
    pub fn snapshot(&self) -> Value {
        Value::Object(self.doc.clone())
    }

    /// Register a hook fired before every mutation
    pub fn add_pre_hook(&mut self, hook: StateHook) {
        self.pre_hooks.push(hook);
    }

    /// Register a hook fired after every mutation
    pub fn add_post_hook(&mut self, hook: StateHook) {
        self.post_hooks.push(hook);
    }
}

fn fire_hooks(hooks: &[StateHook], change: &StateChange, phase: &str) {
    for hook in hooks {
        if let Err(e) = hook(change) {
            warn!(path = %change.path, phase, error = %e, "state hook failed; mutation applied");
        }
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_parse_simple_path() {
        assert_eq!(
            parse_path("a.b").unwrap(),
            vec![
                PathSegment::Key("a".to_string()),
                PathSegment::Key("b".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_indexed_path() {
        assert_eq!(
            parse_path("a.b[3]").unwrap(),
            vec![
                PathSegment::Key("a".to_string()),
                PathSegment::Key("b".to_string()),
                PathSegment::Index(3)
            ]
        );
    }

    #[test]
    fn test_parse_chained_indices() {
        assert_eq!(
            parse_path("grid[1][2]").unwrap(),
            vec![
                PathSegment::Key("grid".to_string()),
                PathSegment::Index(1),
                PathSegment::Index(2)
            ]
        );
    }

    #[test]
    fn test_prefixes_are_equivalent() {
        let plain = parse_path("a.b").unwrap();
        assert_eq!(parse_path("$.a.b").unwrap(), plain);
        assert_eq!(parse_path("state.a.b").unwrap(), plain);
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        assert!(parse_path("").is_err());
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a[").is_err());
        assert!(parse_path("a[x]").is_err());
        assert!(parse_path("[0]").is_err());
    }

    #[test]
    fn test_get_absent_is_distinct_from_null() {
        let mut state = StateStore::new();
        state.set("present", Value::Null).unwrap();

        assert_eq!(state.get("present").unwrap(), Some(Value::Null));
        assert_eq!(state.get("absent").unwrap(), None);
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut state = StateStore::new();
        state.set("a.b.c", json!(42)).unwrap();
        assert_eq!(state.snapshot(), json!({"a": {"b": {"c": 42}}}));
    }

    #[test]
    fn test_set_pads_arrays_with_nulls() {
        let mut state = StateStore::new();
        state.set("items[2]", json!("third")).unwrap();
        assert_eq!(state.snapshot(), json!({"items": [null, null, "third"]}));
    }

    #[test]
    fn test_set_replaces_scalar_intermediates() {
        let mut state = StateStore::from_initial(json!({"a": 1})).unwrap();
        state.set("a.b", json!(2)).unwrap();
        assert_eq!(state.snapshot(), json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_get_returns_deep_clone() {
        let mut state = StateStore::new();
        state.set("user", json!({"name": "alice"})).unwrap();

        let mut read = state.get("user").unwrap().unwrap();
        read["name"] = json!("mallory");

        assert_eq!(state.get("user.name").unwrap(), Some(json!("alice")));
    }

    #[test]
    fn test_set_then_get_round_trips_and_is_idempotent() {
        let mut state = StateStore::new();
        let value = json!({"nested": [1, 2, {"deep": true}]});

        state.set("slot", value.clone()).unwrap();
        assert_eq!(state.get("slot").unwrap(), Some(value.clone()));

        let before = state.snapshot();
        state.set("slot", value).unwrap();
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn test_update_is_shallow_root_merge() {
        let mut state = StateStore::from_initial(json!({"a": {"x": 1}, "b": 2})).unwrap();
        state.update(json!({"a": {"y": 3}, "c": 4})).unwrap();

        // Shallow: the whole of `a` is replaced, not merged.
        assert_eq!(state.snapshot(), json!({"a": {"y": 3}, "b": 2, "c": 4}));
    }

    #[test]
    fn test_update_rejects_non_object() {
        let mut state = StateStore::new();
        assert!(matches!(
            state.update(json!([1, 2])),
            Err(FlowError::State(_))
        ));
    }

    #[test]
    fn test_hooks_fire_around_writes() {
        let mut state = StateStore::new();
        let pre = Arc::new(AtomicUsize::new(0));
        let post = Arc::new(AtomicUsize::new(0));

        let pre_count = pre.clone();
        state.add_pre_hook(Box::new(move |_| {
            pre_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let post_count = post.clone();
        state.add_post_hook(Box::new(move |change| {
            post_count.fetch_add(1, Ordering::SeqCst);
            assert_eq!(change.path, "k");
            Ok(())
        }));

        state.set("k", json!(1)).unwrap();
        assert_eq!(pre.load(Ordering::SeqCst), 1);
        assert_eq!(post.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_hook_does_not_block_mutation() {
        let mut state = StateStore::new();
        state.add_pre_hook(Box::new(|_| Err("hook exploded".to_string())));

        state.set("k", json!("written")).unwrap();
        assert_eq!(state.get("k").unwrap(), Some(json!("written")));
    }

    #[test]
    fn test_root_snapshot_via_dollar() {
        let state = StateStore::from_initial(json!({"a": 1})).unwrap();
        assert_eq!(state.get("$").unwrap(), Some(json!({"a": 1})));
    }

    proptest! {
        #[test]
        fn prop_set_get_deep_equal(
            key in "[a-z]{1,8}",
            sub in "[a-z]{1,8}",
            n in proptest::num::i64::ANY,
        ) {
            let mut state = StateStore::new();
            let path = format!("{}.{}", key, sub);
            state.set(&path, json!(n)).unwrap();
            prop_assert_eq!(state.get(&path).unwrap(), Some(json!(n)));
        }
    }
}
