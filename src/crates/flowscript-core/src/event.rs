//! Lifecycle event types and the delivery seam
//!
//! Executions announce their progress through a closed set of lifecycle
//! events. The runtime context stamps ids and timestamps and hands each event
//! to an [`EventSink`]; the bridge behind the sink decides buffering and
//! fan-out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of lifecycle events an execution can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowStarted,
    NodeExecuting,
    NodeCompleted,
    NodeFailed,
    WorkflowPaused,
    WorkflowResumed,
    WorkflowCompleted,
    WorkflowFailed,
    HumanInputRequired,
    HumanInputReceived,
    HumanInputTimeout,
    StateUpdated,
}

impl EventType {
    /// Wire-format name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WorkflowStarted => "workflow_started",
            EventType::NodeExecuting => "node_executing",
            EventType::NodeCompleted => "node_completed",
            EventType::NodeFailed => "node_failed",
            EventType::WorkflowPaused => "workflow_paused",
            EventType::WorkflowResumed => "workflow_resumed",
            EventType::WorkflowCompleted => "workflow_completed",
            EventType::WorkflowFailed => "workflow_failed",
            EventType::HumanInputRequired => "human_input_required",
            EventType::HumanInputReceived => "human_input_received",
            EventType::HumanInputTimeout => "human_input_timeout",
            EventType::StateUpdated => "state_updated",
        }
    }

    /// Whether this event ends the execution's event stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::WorkflowCompleted | EventType::WorkflowFailed)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single immutable lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    /// Event type from the closed set
    pub event: EventType,
    /// Workflow document id
    pub workflow_id: String,
    /// Execution this event belongs to
    pub execution_id: String,
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Per-type payload (see the event contracts)
    pub data: Value,
}

/// Delivery seam between runtime contexts and the event fan-out.
///
/// `deliver` must not block: implementations buffer or drop, never stall the
/// interpreter.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: WorkflowEvent);
}

/// Sink that discards every event. Useful for detached runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn deliver(&self, _event: WorkflowEvent) {}
}
