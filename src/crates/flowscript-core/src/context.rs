//! Per-execution runtime context
//!
//! The [`RuntimeContext`] is the only surface a node uses to touch the world
//! outside its state document: it emits lifecycle events, issues pause
//! tokens, awaits resumes, and tracks the currently executing node. It is
//! cheaply cloneable; all clones share the same execution.

use crate::error::{FlowError, Result};
use crate::event::{EventSink, EventType, WorkflowEvent};
use crate::pause::PauseToken;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Lifecycle status of a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    /// Terminal statuses are sinks: no further transitions are allowed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Stopped
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

struct ContextInner {
    workflow_id: String,
    execution_id: String,
    sink: Arc<dyn EventSink>,
    status: RwLock<ExecutionStatus>,
    current_node: RwLock<Option<String>>,
    tokens: Mutex<HashMap<String, Arc<PauseToken>>>,
    cancel_requested: AtomicBool,
    node_seq: AtomicU64,
}

/// Shared per-execution façade handed to nodes and the interpreter
#[derive(Clone)]
pub struct RuntimeContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("workflow_id", &self.inner.workflow_id)
            .field("execution_id", &self.inner.execution_id)
            .field("status", &self.status())
            .finish()
    }
}

impl RuntimeContext {
    /// Create a context for a fresh execution in `Running` status
    pub fn new(
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                workflow_id: workflow_id.into(),
                execution_id: execution_id.into(),
                sink,
                status: RwLock::new(ExecutionStatus::Running),
                current_node: RwLock::new(None),
                tokens: Mutex::new(HashMap::new()),
                cancel_requested: AtomicBool::new(false),
                node_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Workflow document id
    pub fn workflow_id(&self) -> &str {
        &self.inner.workflow_id
    }

    /// Execution id
    pub fn execution_id(&self) -> &str {
        &self.inner.execution_id
    }

    /// Current execution status
    pub fn status(&self) -> ExecutionStatus {
        *self.inner.status.read().unwrap()
    }

    /// Stamp ids and timestamp on an event and hand it to the sink.
    ///
    /// Emitting after the execution reached a terminal status is a no-op.
    pub fn emit(&self, event: EventType, data: Value) {
        if self.status().is_terminal() {
            debug!(
                execution_id = %self.inner.execution_id,
                event = %event,
                "dropping event emitted after termination"
            );
            return;
        }
        self.deliver(event, data);
    }

    /// Currently executing node id, if any
    pub fn current_node(&self) -> Option<String> {
        self.inner.current_node.read().unwrap().clone()
    }

    /// Record the node the interpreter is currently executing
    pub fn set_current_node(&self, node_id: Option<String>) {
        *self.inner.current_node.write().unwrap() = node_id;
    }

    /// Mint a per-dispatch node id. Repeated dispatches of one node get
    /// distinguishable ids (`name-1`, `name-2`, ...).
    pub fn next_node_id(&self, name: &str) -> String {
        let seq = self.inner.node_seq.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", name, seq)
    }

    /// Issue a pause token and move the execution to `Paused`
    pub fn pause(&self, node_id: &str) -> Result<Arc<PauseToken>> {
        self.pause_with_timeout(node_id, None)
    }

    /// Issue a pause token that auto-cancels after `timeout`.
    ///
    /// On expiry the waiter observes `HumanInputTimeout` and a
    /// `human_input_timeout` event is emitted.
    pub fn pause_with_timeout(
        &self,
        node_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Arc<PauseToken>> {
        if self.status().is_terminal() {
            return Err(FlowError::ExecutionTerminated);
        }

        let token = Arc::new(PauseToken::new(
            &self.inner.workflow_id,
            &self.inner.execution_id,
            node_id,
        ));
        self.inner
            .tokens
            .lock()
            .unwrap()
            .insert(token.id().to_string(), token.clone());
        self.set_status(ExecutionStatus::Paused);
        self.deliver(
            EventType::WorkflowPaused,
            json!({
                "nodeId": node_id,
                "tokenId": token.id(),
                "timeoutMs": timeout.map(|t| t.as_millis() as u64),
            }),
        );

        if let Some(interval) = timeout {
            let ctx = self.clone();
            let expiring = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                if expiring.cancel_with(FlowError::HumanInputTimeout).is_ok() {
                    ctx.remove_token(expiring.id());
                    ctx.emit(
                        EventType::HumanInputTimeout,
                        json!({
                            "tokenId": expiring.id(),
                            "nodeId": expiring.descriptor().node_id.clone(),
                        }),
                    );
                }
            });
        }

        Ok(token)
    }

    /// Await a token's settlement.
    ///
    /// On resume the context emits `human_input_received` and
    /// `workflow_resumed` and flips the status back to `Running`; rejections,
    /// cancellations, and timeouts surface as errors.
    pub async fn wait_for_resume(&self, token: &Arc<PauseToken>) -> Result<Value> {
        let outcome = token.wait().await;
        self.remove_token(token.id());

        match outcome {
            Ok(data) => {
                self.set_status(ExecutionStatus::Running);
                self.deliver(
                    EventType::HumanInputReceived,
                    json!({
                        "tokenId": token.id(),
                        "nodeId": token.descriptor().node_id.clone(),
                        "data": data.clone(),
                    }),
                );
                self.deliver(EventType::WorkflowResumed, json!({"tokenId": token.id()}));
                Ok(data)
            }
            Err(e) => Err(e),
        }
    }

    /// Resume the token with the given id. Brokered by the execution manager.
    pub fn resume(&self, token_id: &str, data: Value) -> Result<()> {
        let token = self
            .find_token(token_id)
            .ok_or_else(|| FlowError::UnknownPauseToken(token_id.to_string()))?;
        token.resume(data)
    }

    /// Cancel the token with the given id
    pub fn cancel_token(&self, token_id: &str) -> Result<()> {
        let token = self
            .find_token(token_id)
            .ok_or_else(|| FlowError::UnknownPauseToken(token_id.to_string()))?;
        token.cancel()?;
        self.remove_token(token_id);
        Ok(())
    }

    /// Ids of all outstanding pause tokens
    pub fn active_tokens(&self) -> Vec<String> {
        self.inner.tokens.lock().unwrap().keys().cloned().collect()
    }

    /// Request cancellation: cancels every outstanding token and raises the
    /// flag the interpreter polls between elements.
    pub fn request_cancel(&self) {
        self.inner.cancel_requested.store(true, Ordering::SeqCst);
        self.cancel_all_tokens();
    }

    /// Whether cancellation has been requested
    pub fn cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::SeqCst)
    }

    /// Transition to a terminal status and cancel any tokens still
    /// outstanding. Later `emit` calls are dropped.
    pub fn finish(&self, status: ExecutionStatus) {
        if !status.is_terminal() {
            warn!(status = %status, "finish called with non-terminal status; ignoring");
            return;
        }
        self.cancel_all_tokens();
        self.set_status(status);
        self.set_current_node(None);
    }

    fn cancel_all_tokens(&self) {
        let tokens: Vec<Arc<PauseToken>> =
            self.inner.tokens.lock().unwrap().drain().map(|(_, t)| t).collect();
        for token in tokens {
            // Already-settled tokens are fine to skip.
            let _ = token.cancel();
        }
    }

    fn find_token(&self, token_id: &str) -> Option<Arc<PauseToken>> {
        self.inner.tokens.lock().unwrap().get(token_id).cloned()
    }

    fn remove_token(&self, token_id: &str) {
        self.inner.tokens.lock().unwrap().remove(token_id);
    }

    fn set_status(&self, status: ExecutionStatus) {
        let mut current = self.inner.status.write().unwrap();
        if current.is_terminal() {
            return;
        }
        *current = status;
    }

    fn deliver(&self, event: EventType, data: Value) {
        self.inner.sink.deliver(WorkflowEvent {
            event,
            workflow_id: self.inner.workflow_id.clone(),
            execution_id: self.inner.execution_id.clone(),
            timestamp: Utc::now(),
            data,
        });
    }
}
