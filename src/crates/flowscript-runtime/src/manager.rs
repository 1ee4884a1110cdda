//! Execution manager
//!
//! Owns the live executions table: validates submitted documents, spawns one
//! interpreter task per run, answers status queries, brokers resume requests
//! by execution and token id, and cancels runs. The lane, execution record,
//! and buffer all exist before `submit` returns, so a caller can attach a
//! subscriber without racing the first event.

use crate::bridge::{BridgeSink, EventBridge, EventSubscription};
use chrono::{DateTime, Utc};
use flowscript_core::{
    validate_workflow, ExecutionStatus, FlowError, FlowInterpreter, InterpreterConfig,
    NodeRegistry, Result, RuntimeContext, StateStore, Workflow,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Manager tuning knobs
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Interpreter configuration applied to every execution
    pub interpreter: InterpreterConfig,
    /// How long a terminal execution stays queryable before eviction
    pub retention: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            interpreter: InterpreterConfig::default(),
            retention: Duration::from_secs(60),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interpreter(mut self, interpreter: InterpreterConfig) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// Point-in-time view of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatusRecord {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
}

struct ExecutionEntry {
    workflow_id: String,
    ctx: RuntimeContext,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl ExecutionEntry {
    fn record(&self, execution_id: &str) -> ExecutionStatusRecord {
        ExecutionStatusRecord {
            execution_id: execution_id.to_string(),
            workflow_id: self.workflow_id.clone(),
            status: self.ctx.status(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            current_node_id: self.ctx.current_node(),
        }
    }
}

/// Multiplexes concurrent workflow executions
pub struct ExecutionManager {
    registry: Arc<NodeRegistry>,
    bridge: Arc<EventBridge>,
    executions: Arc<Mutex<HashMap<String, ExecutionEntry>>>,
    config: ManagerConfig,
}

impl ExecutionManager {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_config(registry, Arc::new(EventBridge::new()), ManagerConfig::default())
    }

    pub fn with_config(
        registry: Arc<NodeRegistry>,
        bridge: Arc<EventBridge>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            registry,
            bridge,
            executions: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// The bridge carrying this manager's event lanes
    pub fn bridge(&self) -> Arc<EventBridge> {
        self.bridge.clone()
    }

    /// The node registry executions resolve against
    pub fn registry(&self) -> Arc<NodeRegistry> {
        self.registry.clone()
    }

    /// Validate a workflow document and start executing it.
    ///
    /// Returns the fresh execution id before the interpreter advances; the
    /// first step runs behind a scheduling yield, and the lane buffers any
    /// events emitted before a subscriber attaches.
    pub fn submit(&self, definition: Value, initial_input: Option<Value>) -> Result<String> {
        validate_workflow(&definition)?;
        let workflow: Workflow = serde_json::from_value(definition)?;

        let mut state = StateStore::from_initial(
            workflow.initial_state.clone().unwrap_or(Value::Null),
        )?;
        if let Some(input) = initial_input {
            state.update(input)?;
        }

        let execution_id = Uuid::new_v4().to_string();
        self.bridge.open_lane(&execution_id);

        let ctx = RuntimeContext::new(
            workflow.id.clone(),
            execution_id.clone(),
            Arc::new(BridgeSink::new(self.bridge.clone())),
        );
        self.executions.lock().unwrap().insert(
            execution_id.clone(),
            ExecutionEntry {
                workflow_id: workflow.id.clone(),
                ctx: ctx.clone(),
                started_at: Utc::now(),
                ended_at: None,
            },
        );
        info!(
            execution_id = %execution_id,
            workflow_id = %workflow.id,
            "execution submitted"
        );

        let interpreter =
            FlowInterpreter::with_config(self.registry.clone(), self.config.interpreter.clone());
        let executions = self.executions.clone();
        let retention = self.config.retention;
        let id = execution_id.clone();
        tokio::spawn(async move {
            // Give the submitter a chance to attach subscribers first; the
            // lane buffer covers anything emitted regardless.
            tokio::task::yield_now().await;

            let outcome = interpreter.run(&workflow, &mut state, &ctx).await;
            debug!(
                execution_id = %id,
                completed = outcome.completed,
                exit_signal = ?outcome.exit_signal,
                "execution finished"
            );

            if let Some(entry) = executions.lock().unwrap().get_mut(&id) {
                entry.ended_at = Some(Utc::now());
            }

            tokio::time::sleep(retention).await;
            executions.lock().unwrap().remove(&id);
            debug!(execution_id = %id, "execution record evicted");
        });

        Ok(execution_id)
    }

    /// Status of a live (or recently terminal) execution
    pub fn status(&self, execution_id: &str) -> Result<ExecutionStatusRecord> {
        self.executions
            .lock()
            .unwrap()
            .get(execution_id)
            .map(|entry| entry.record(execution_id))
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Enumerate live executions
    pub fn list(&self) -> Vec<ExecutionStatusRecord> {
        self.executions
            .lock()
            .unwrap()
            .iter()
            .map(|(id, entry)| entry.record(id))
            .collect()
    }

    /// Forward a resume request to the paused execution's context
    pub fn resume(&self, execution_id: &str, token_id: &str, data: Value) -> Result<()> {
        let ctx = self.context_for(execution_id)?;
        if ctx.status() != ExecutionStatus::Paused {
            return Err(FlowError::NotPaused(execution_id.to_string()));
        }
        ctx.resume(token_id, data)
    }

    /// Cancel an execution: outstanding pause tokens are cancelled and the
    /// interpreter stops at its next between-element check.
    pub fn cancel(&self, execution_id: &str) -> Result<()> {
        let ctx = self.context_for(execution_id)?;
        if ctx.status().is_terminal() {
            warn!(execution_id = %execution_id, "cancel on terminal execution ignored");
            return Ok(());
        }
        ctx.request_cancel();
        info!(execution_id = %execution_id, "cancellation requested");
        Ok(())
    }

    /// Attach a subscriber to an execution's event lane
    pub fn subscribe(&self, execution_id: &str) -> Result<EventSubscription> {
        self.bridge.subscribe(execution_id)
    }

    fn context_for(&self, execution_id: &str) -> Result<RuntimeContext> {
        self.executions
            .lock()
            .unwrap()
            .get(execution_id)
            .map(|entry| entry.ctx.clone())
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::LaneEvent;
    use flowscript_core::EventType;
    use serde_json::json;

    fn manager() -> ExecutionManager {
        ExecutionManager::new(Arc::new(NodeRegistry::with_builtins()))
    }

    fn counting_workflow() -> Value {
        json!({
            "id": "count",
            "name": "counting",
            "initialState": {"n": 0},
            "nodes": [
                {"setValue": {"path": "n", "value": 1}},
                {"setValue": {"path": "done", "value": true}}
            ]
        })
    }

    async fn wait_terminal(sub: &mut EventSubscription) -> Vec<EventType> {
        let mut seen = Vec::new();
        while let Some(lane_event) = sub.next().await {
            if let LaneEvent::Event(e) = lane_event {
                seen.push(e.event);
                if e.event.is_terminal() {
                    break;
                }
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_document() {
        let m = manager();
        let result = m.submit(json!({"nodes": "nope"}), None);

        assert!(matches!(result, Err(FlowError::SchemaInvalid { .. })));
        assert!(m.list().is_empty());
        assert_eq!(m.bridge().lane_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_creates_record_and_lane_before_return() {
        let m = manager();
        let id = m.submit(counting_workflow(), None).unwrap();

        assert!(m.bridge().has_lane(&id));
        let record = m.status(&id).unwrap();
        assert_eq!(record.workflow_id, "count");

        let mut sub = m.subscribe(&id).unwrap();
        let events = wait_terminal(&mut sub).await;
        assert_eq!(events.first(), Some(&EventType::WorkflowStarted));
        assert_eq!(events.last(), Some(&EventType::WorkflowCompleted));
        assert_eq!(m.status(&id).unwrap().status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_initial_input_merges_over_initial_state() {
        let m = manager();
        let wf = json!({
            "id": "in",
            "name": "input",
            "initialState": {"a": 1, "b": 2},
            "nodes": []
        });
        let id = m.submit(wf, Some(json!({"b": 20, "c": 30}))).unwrap();

        let mut sub = m.subscribe(&id).unwrap();
        while let Some(lane_event) = sub.next().await {
            if let LaneEvent::Event(e) = lane_event {
                if e.event == EventType::WorkflowCompleted {
                    assert_eq!(e.data["finalState"], json!({"a": 1, "b": 20, "c": 30}));
                    return;
                }
            }
        }
        panic!("terminal event not observed");
    }

    #[tokio::test]
    async fn test_resume_on_running_execution_is_not_paused() {
        let m = manager();
        let id = m.submit(counting_workflow(), None).unwrap();

        let result = m.resume(&id, "some-token", json!({}));
        assert!(matches!(
            result,
            Err(FlowError::NotPaused(_)) | Err(FlowError::UnknownPauseToken(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_execution_operations_fail() {
        let m = manager();
        assert!(matches!(
            m.status("ghost"),
            Err(FlowError::ExecutionNotFound(_))
        ));
        assert!(matches!(
            m.resume("ghost", "t", json!({})),
            Err(FlowError::ExecutionNotFound(_))
        ));
        assert!(matches!(
            m.cancel("ghost"),
            Err(FlowError::ExecutionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_reports_live_executions() {
        let m = manager();
        let first = m.submit(counting_workflow(), None).unwrap();
        let second = m.submit(counting_workflow(), None).unwrap();

        let ids: Vec<String> = m.list().into_iter().map(|r| r.execution_id).collect();
        assert!(ids.contains(&first));
        assert!(ids.contains(&second));
    }

    #[tokio::test]
    async fn test_resubmission_yields_independent_executions() {
        let m = manager();
        let first = m.submit(counting_workflow(), None).unwrap();
        let second = m.submit(counting_workflow(), None).unwrap();
        assert_ne!(first, second);

        for id in [&first, &second] {
            let mut sub = m.subscribe(id).unwrap();
            let events = wait_terminal(&mut sub).await;
            assert_eq!(events.last(), Some(&EventType::WorkflowCompleted));
        }
    }
}
