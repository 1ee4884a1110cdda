//! Workflow IR: the declarative flow document
//!
//! A workflow is a JSON document of named steps, branches, and loops. The
//! wire format discriminates elements purely by shape, and that shape set is
//! closed, so the IR is modeled as a sum type and matched exhaustively:
//!
//! - `"fetch"` — node reference
//! - `{"transform": {...}}` — configured node (single-key object)
//! - `[condition, {edge: target, ...}]` — branch (second slot is an object)
//! - `[controller, [body...]]` — loop (second slot is an array)

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An immutable workflow document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique workflow id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Optional initial state document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<Value>,
    /// Top-level flow elements, executed in order
    pub nodes: Vec<FlowElement>,
}

/// One unit of the workflow IR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum FlowElement {
    /// Bare node reference
    Reference(String),
    /// Node with a config object (may contain `{{path}}` placeholders)
    Configured { name: String, config: Value },
    /// Two-slot branch: condition element and edge → target map
    Branch {
        condition: Box<FlowElement>,
        branches: IndexMap<String, BranchTarget>,
    },
    /// Two-slot loop: controller element and body list
    Loop {
        controller: Box<FlowElement>,
        body: Vec<FlowElement>,
    },
}

/// Target of one branch edge
#[derive(Debug, Clone, PartialEq)]
pub enum BranchTarget {
    /// `null`: the edge is acknowledged and nothing runs
    Skip,
    /// A single flow element
    Element(Box<FlowElement>),
    /// A list of flow elements run in order
    Sequence(Vec<FlowElement>),
}

impl FlowElement {
    /// Node name, for reference and configured elements
    pub fn node_name(&self) -> Option<&str> {
        match self {
            FlowElement::Reference(name) => Some(name),
            FlowElement::Configured { name, .. } => Some(name),
            FlowElement::Branch { .. } | FlowElement::Loop { .. } => None,
        }
    }

    /// Whether this element dispatches a single node
    pub fn is_node(&self) -> bool {
        self.node_name().is_some()
    }
}

impl TryFrom<Value> for FlowElement {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(name) => Ok(FlowElement::Reference(name)),
            Value::Object(map) => configured_from_object(map),
            Value::Array(slots) => two_slot_from_array(slots),
            other => Err(format!(
                "flow element must be a string, object, or array, got {}",
                type_name(&other)
            )),
        }
    }
}

fn configured_from_object(map: Map<String, Value>) -> Result<FlowElement, String> {
    if map.len() != 1 {
        return Err(format!(
            "configured node must be a single-key object, got {} keys",
            map.len()
        ));
    }
    let (name, config) = map
        .into_iter()
        .next()
        .ok_or_else(|| "configured node object is empty".to_string())?;
    if !config.is_object() {
        return Err(format!(
            "config for node '{}' must be an object, got {}",
            name,
            type_name(&config)
        ));
    }
    Ok(FlowElement::Configured { name, config })
}

fn two_slot_from_array(slots: Vec<Value>) -> Result<FlowElement, String> {
    if slots.len() != 2 {
        return Err(format!(
            "branch/loop element must have exactly two slots, got {}",
            slots.len()
        ));
    }
    let mut slots = slots.into_iter();
    let first = slots.next().ok_or_else(|| "missing first slot".to_string())?;
    let second = slots.next().ok_or_else(|| "missing second slot".to_string())?;

    let head = FlowElement::try_from(first)?;
    if !head.is_node() {
        return Err("branch condition / loop controller must be a node element".to_string());
    }

    match second {
        // Object second slot: branch.
        Value::Object(map) => {
            let mut branches = IndexMap::new();
            for (edge, target) in map {
                branches.insert(edge, BranchTarget::try_from(target)?);
            }
            Ok(FlowElement::Branch {
                condition: Box::new(head),
                branches,
            })
        }
        // Array second slot: loop.
        Value::Array(items) => {
            let body = items
                .into_iter()
                .map(FlowElement::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FlowElement::Loop {
                controller: Box::new(head),
                body,
            })
        }
        other => Err(format!(
            "second slot must be an object (branch) or array (loop), got {}",
            type_name(&other)
        )),
    }
}

impl TryFrom<Value> for BranchTarget {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(BranchTarget::Skip),
            Value::Array(items) => {
                // An array target is a list of elements unless it parses as a
                // two-slot branch/loop element.
                if items.len() == 2 {
                    if let Ok(element) = two_slot_from_array(items.clone()) {
                        return Ok(BranchTarget::Element(Box::new(element)));
                    }
                }
                let elements = items
                    .into_iter()
                    .map(FlowElement::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(BranchTarget::Sequence(elements))
            }
            other => Ok(BranchTarget::Element(Box::new(FlowElement::try_from(
                other,
            )?))),
        }
    }
}

impl From<FlowElement> for Value {
    fn from(element: FlowElement) -> Self {
        match element {
            FlowElement::Reference(name) => Value::String(name),
            FlowElement::Configured { name, config } => {
                let mut map = Map::new();
                map.insert(name, config);
                Value::Object(map)
            }
            FlowElement::Branch {
                condition,
                branches,
            } => {
                let mut map = Map::new();
                for (edge, target) in branches {
                    map.insert(edge, target.into());
                }
                Value::Array(vec![(*condition).into(), Value::Object(map)])
            }
            FlowElement::Loop { controller, body } => Value::Array(vec![
                (*controller).into(),
                Value::Array(body.into_iter().map(Into::into).collect()),
            ]),
        }
    }
}

impl From<BranchTarget> for Value {
    fn from(target: BranchTarget) -> Self {
        match target {
            BranchTarget::Skip => Value::Null,
            BranchTarget::Element(element) => (*element).into(),
            BranchTarget::Sequence(elements) => {
                Value::Array(elements.into_iter().map(Into::into).collect())
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
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
    use serde_json::json;

    #[test]
    fn test_parse_reference() {
        let element: FlowElement = serde_json::from_value(json!("fetch")).unwrap();
        assert_eq!(element, FlowElement::Reference("fetch".to_string()));
    }

    #[test]
    fn test_parse_configured() {
        let element: FlowElement =
            serde_json::from_value(json!({"transform": {"field": "x"}})).unwrap();
        match element {
            FlowElement::Configured { name, config } => {
                assert_eq!(name, "transform");
                assert_eq!(config, json!({"field": "x"}));
            }
            other => panic!("expected configured node, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_branch_by_object_second_slot() {
        let element: FlowElement = serde_json::from_value(json!([
            "classify",
            {"high": "doH", "low": ["doL1", "doL2"], "skip": null}
        ]))
        .unwrap();

        match element {
            FlowElement::Branch {
                condition,
                branches,
            } => {
                assert_eq!(*condition, FlowElement::Reference("classify".to_string()));
                assert_eq!(
                    branches.keys().collect::<Vec<_>>(),
                    vec!["high", "low", "skip"]
                );
                assert!(matches!(branches["high"], BranchTarget::Element(_)));
                assert!(matches!(
                    &branches["low"],
                    BranchTarget::Sequence(seq) if seq.len() == 2
                ));
                assert!(matches!(branches["skip"], BranchTarget::Skip));
            }
            other => panic!("expected branch, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_loop_by_array_second_slot() {
        let element: FlowElement =
            serde_json::from_value(json!(["whileCondition", ["work", "tally"]])).unwrap();

        match element {
            FlowElement::Loop { controller, body } => {
                assert_eq!(
                    *controller,
                    FlowElement::Reference("whileCondition".to_string())
                );
                assert_eq!(body.len(), 2);
            }
            other => panic!("expected loop, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_loop_in_branch_body() {
        let element: FlowElement = serde_json::from_value(json!([
            "check",
            {"retry": ["whileCondition", ["attempt"]]}
        ]))
        .unwrap();

        match element {
            FlowElement::Branch { branches, .. } => match &branches["retry"] {
                BranchTarget::Element(inner) => {
                    assert!(matches!(**inner, FlowElement::Loop { .. }))
                }
                other => panic!("expected loop element target, got {:?}", other),
            },
            other => panic!("expected branch, got {:?}", other),
        }
    }

    #[test]
    fn test_reject_wrong_arity() {
        assert!(serde_json::from_value::<FlowElement>(json!(["a", "b", "c"])).is_err());
        assert!(serde_json::from_value::<FlowElement>(json!(["a"])).is_err());
    }

    #[test]
    fn test_reject_multi_key_config_object() {
        assert!(serde_json::from_value::<FlowElement>(json!({"a": {}, "b": {}})).is_err());
    }

    #[test]
    fn test_reject_non_node_condition() {
        let doc = json!([["inner", {"x": null}], {"y": null}]);
        assert!(serde_json::from_value::<FlowElement>(doc).is_err());
    }

    #[test]
    fn test_round_trip_preserves_shape() {
        let doc = json!([
            "classify",
            {"high": {"doH": {"level": "{{n}}"}}, "low": ["doL"], "none": null}
        ]);
        let element: FlowElement = serde_json::from_value(doc.clone()).unwrap();
        assert_eq!(serde_json::to_value(element).unwrap(), doc);
    }

    #[test]
    fn test_workflow_wire_format() {
        let wf: Workflow = serde_json::from_value(json!({
            "id": "s",
            "name": "sequential",
            "initialState": {"count": 0},
            "nodes": ["inc", "inc"]
        }))
        .unwrap();

        assert_eq!(wf.id, "s");
        assert_eq!(wf.initial_state, Some(json!({"count": 0})));
        assert_eq!(wf.nodes.len(), 2);
    }
}
