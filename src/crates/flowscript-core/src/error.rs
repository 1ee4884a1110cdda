//! Error types for the workflow runtime
//!
//! All runtime failures are expressed as [`FlowError`]. The taxonomy follows
//! the engine layers: validation errors reject a workflow document before any
//! execution exists, resolution errors surface while the interpreter walks the
//! flow, node errors wrap failures inside `execute`, concurrency errors guard
//! the pause/resume machinery, and time errors cover both budget layers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during workflow validation and execution
#[derive(Debug, Error)]
pub enum FlowError {
    /// Workflow document failed structural validation
    #[error("workflow schema invalid: {}", violations.join("; "))]
    SchemaInvalid {
        /// Path-annotated descriptions of every violation found
        violations: Vec<String>,
    },

    /// A flow element referenced a node name missing from the registry
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// A `loopTo:` edge named a node absent from the current frame
    #[error("loopTo target not found in current frame: {0}")]
    TargetNotFound(String),

    /// A loop controller returned an edge other than
    /// `next_iteration`/`exit_loop`
    #[error("invalid loop controller edge '{edge}' from node '{node}'")]
    InvalidLoopEdge { node: String, edge: String },

    /// A node's `execute` failed, returned no edges, or selected the
    /// `error` edge outside a branch
    #[error("node '{node}' failed: {message}")]
    NodeFailed { node: String, message: String },

    /// An operation was attempted on an execution that already reached a
    /// terminal status
    #[error("execution has already terminated")]
    ExecutionTerminated,

    /// The execution was cancelled while a node was waiting
    #[error("execution was cancelled")]
    Cancelled,

    /// A pause token was settled (or waited on) more than once
    #[error("pause token already settled")]
    TokenSettled,

    /// A resume or cancel referenced a pause token id that is not active
    #[error("unknown pause token: {0}")]
    UnknownPauseToken(String),

    /// A resume was requested for an execution that is not paused
    #[error("execution is not paused: {0}")]
    NotPaused(String),

    /// The execution id is not present in the live executions table
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    /// The execution exceeded its wall-clock budget
    #[error("execution exceeded its time budget")]
    TimeoutExceeded,

    /// A pause token's own timeout elapsed before a resume arrived
    #[error("human input timed out")]
    HumanInputTimeout,

    /// A state path could not be parsed
    #[error("invalid state path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    /// A state document operation failed
    #[error("state error: {0}")]
    State(String),

    /// An expression was rejected by the restricted grammar or failed to
    /// evaluate
    #[error("expression error: {0}")]
    Expression(String),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// Stable machine-readable kind for event payloads and terminal results
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::SchemaInvalid { .. } => "SchemaInvalid",
            FlowError::UnknownNode(_) => "UnknownNode",
            FlowError::TargetNotFound(_) => "TargetNotFound",
            FlowError::InvalidLoopEdge { .. } => "InvalidLoopEdge",
            FlowError::NodeFailed { .. } => "NodeFailed",
            FlowError::ExecutionTerminated => "ExecutionTerminated",
            FlowError::Cancelled => "Cancelled",
            FlowError::TokenSettled => "TokenSettled",
            FlowError::UnknownPauseToken(_) => "UnknownPauseToken",
            FlowError::NotPaused(_) => "NotPaused",
            FlowError::ExecutionNotFound(_) => "ExecutionNotFound",
            FlowError::TimeoutExceeded => "TimeoutExceeded",
            FlowError::HumanInputTimeout => "HumanInputTimeout",
            FlowError::InvalidPath { .. } => "InvalidPath",
            FlowError::State(_) => "State",
            FlowError::Expression(_) => "Expression",
            FlowError::Serialization(_) => "Serialization",
        }
    }
}

/// Structured error record carried in terminal results and failure events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Machine-readable error kind
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

impl From<&FlowError> for ErrorInfo {
    fn from(err: &FlowError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type for workflow runtime operations
pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_invalid_joins_violations() {
        let err = FlowError::SchemaInvalid {
            violations: vec!["nodes: missing".to_string(), "id: empty".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "workflow schema invalid: nodes: missing; id: empty"
        );
    }

    #[test]
    fn test_error_info_carries_kind_and_message() {
        let err = FlowError::UnknownNode("transform".to_string());
        let info = ErrorInfo::from(&err);
        assert_eq!(info.kind, "UnknownNode");
        assert_eq!(info.message, "unknown node: transform");
    }

    #[test]
    fn test_kind_is_stable_for_time_errors() {
        assert_eq!(FlowError::TimeoutExceeded.kind(), "TimeoutExceeded");
        assert_eq!(FlowError::HumanInputTimeout.kind(), "HumanInputTimeout");
    }
}
