//! Structural validation of workflow documents
//!
//! Validates the raw JSON document before any execution is created, walking
//! the whole tree and collecting every violation rather than stopping at the
//! first. Node name existence is deliberately not checked here; resolution
//! happens at first dispatch.

use crate::error::{FlowError, Result};
use serde_json::Value;

/// Validate a workflow document. Returns `SchemaInvalid` carrying every
/// violation found.
pub fn validate_workflow(doc: &Value) -> Result<()> {
    let mut violations = Vec::new();

    let root = match doc.as_object() {
        Some(map) => map,
        None => {
            return Err(FlowError::SchemaInvalid {
                violations: vec!["$: workflow must be a JSON object".to_string()],
            })
        }
    };

    match root.get("id") {
        Some(Value::String(id)) if !id.is_empty() => {}
        Some(Value::String(_)) => violations.push("id: must not be empty".to_string()),
        Some(_) => violations.push("id: must be a string".to_string()),
        None => violations.push("id: required".to_string()),
    }

    match root.get("name") {
        Some(Value::String(_)) => {}
        Some(_) => violations.push("name: must be a string".to_string()),
        None => violations.push("name: required".to_string()),
    }

    if let Some(initial) = root.get("initialState") {
        if !initial.is_object() && !initial.is_null() {
            violations.push("initialState: must be an object".to_string());
        }
    }

    match root.get("nodes") {
        Some(Value::Array(nodes)) => {
            for (i, element) in nodes.iter().enumerate() {
                validate_element(element, &format!("nodes[{}]", i), &mut violations);
            }
        }
        Some(_) => violations.push("nodes: must be an array".to_string()),
        None => violations.push("nodes: required".to_string()),
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(FlowError::SchemaInvalid { violations })
    }
}

fn validate_element(element: &Value, path: &str, violations: &mut Vec<String>) {
    match element {
        Value::String(name) => {
            if name.is_empty() {
                violations.push(format!("{}: node reference must not be empty", path));
            }
        }
        Value::Object(map) => {
            if map.len() != 1 {
                violations.push(format!(
                    "{}: configured node must be a single-key object, got {} keys",
                    path,
                    map.len()
                ));
                return;
            }
            if let Some((name, config)) = map.iter().next() {
                if name.is_empty() {
                    violations.push(format!("{}: node name must not be empty", path));
                }
                if !config.is_object() {
                    violations.push(format!("{}.{}: config must be an object", path, name));
                }
            }
        }
        Value::Array(slots) => validate_two_slot(slots, path, violations),
        other => violations.push(format!(
            "{}: flow element must be a string, object, or array, got {}",
            path,
            type_name(other)
        )),
    }
}

fn validate_two_slot(slots: &[Value], path: &str, violations: &mut Vec<String>) {
    if slots.len() != 2 {
        violations.push(format!(
            "{}: branch/loop must have exactly two slots, got {}",
            path,
            slots.len()
        ));
        return;
    }

    // First slot: the condition/controller, restricted to node elements so it
    // always yields an edge name.
    match &slots[0] {
        Value::String(_) | Value::Object(_) => {
            validate_element(&slots[0], &format!("{}[0]", path), violations)
        }
        _ => violations.push(format!(
            "{}[0]: condition/controller must be a node element",
            path
        )),
    }

    match &slots[1] {
        // Branch: edge name → element, element list, or null.
        Value::Object(branches) => {
            for (edge, target) in branches {
                let target_path = format!("{}[1].{}", path, edge);
                match target {
                    Value::Null => {}
                    Value::Array(items) if !is_two_slot_element(items) => {
                        for (i, item) in items.iter().enumerate() {
                            validate_element(
                                item,
                                &format!("{}[{}]", target_path, i),
                                violations,
                            );
                        }
                    }
                    other => validate_element(other, &target_path, violations),
                }
            }
        }
        // Loop: body is a list of elements.
        Value::Array(body) => {
            for (i, item) in body.iter().enumerate() {
                validate_element(item, &format!("{}[1][{}]", path, i), violations);
            }
        }
        other => violations.push(format!(
            "{}[1]: must be an object (branch) or array (loop), got {}",
            path,
            type_name(other)
        )),
    }
}

/// Whether an array parses as a single two-slot branch/loop element rather
/// than a list of elements.
fn is_two_slot_element(items: &[Value]) -> bool {
    items.len() == 2
        && matches!(items[0], Value::String(_) | Value::Object(_))
        && matches!(items[1], Value::Object(_) | Value::Array(_))
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
