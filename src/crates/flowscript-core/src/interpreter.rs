//! Flow interpreter
//!
//! Walks a validated workflow document and executes it against one state
//! document: sequential steps, branches, loops, and the jump edges. Each
//! element list runs as one frame with its own program counter; branch and
//! loop bodies recurse into child frames. `loopTo:` jumps resolve against the
//! current frame only, and `exit` unwinds every frame.
//!
//! The interpreter is strictly sequential within an execution: a node's edge
//! is produced and merged before the next element is classified. Cancellation
//! and the wall-clock budget are observed between elements, never mid-node.

use crate::context::{ExecutionStatus, RuntimeContext};
use crate::error::{ErrorInfo, FlowError, Result};
use crate::event::EventType;
use crate::flow::{BranchTarget, FlowElement, Workflow};
use crate::node::{
    EdgeMap, Node, NodeContext, EDGE_ERROR, EDGE_EXIT, EDGE_EXIT_LOOP, EDGE_LOOP_TO_PREFIX,
    EDGE_NEXT_ITERATION,
};
use crate::registry::NodeRegistry;
use crate::retry::NodePolicy;
use crate::state::StateStore;
use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Exit signal recorded when a node selects the `exit` edge
pub const EXIT_SIGNAL_EXPLICIT: &str = "explicit_exit";
/// Exit signal recorded when the execution is cancelled externally
pub const EXIT_SIGNAL_CANCELLED: &str = "cancelled";

/// Interpreter tuning knobs
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Wall-clock budget for one execution, checked between elements
    pub timeout: Duration,
    node_policies: HashMap<String, NodePolicy>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            node_policies: HashMap::new(),
        }
    }
}

impl InterpreterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Interpose a failure policy for every dispatch of the named node
    pub fn with_node_policy(mut self, node: impl Into<String>, policy: NodePolicy) -> Self {
        self.node_policies.insert(node.into(), policy);
        self
    }
}

/// Terminal result of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    /// Whether the workflow ran to completion (including explicit exits)
    pub completed: bool,
    /// `explicit_exit` or `cancelled`, when an exit signal ended the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<String>,
    /// Final state snapshot; on failure, the last coherent snapshot
    pub state: Value,
    /// Structured error for failed executions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// How a frame ended
enum FrameSignal {
    Completed,
    Exit,
    Cancelled,
}

/// Result of dispatching one node: its selected edge and produced payload
struct NodeOutcome {
    node_name: String,
    edge: String,
    payload: Option<Value>,
}

/// What the selected edge means for the current frame
enum EdgeAction {
    Advance,
    Jump(usize),
    Exit,
}

/// Executes workflow documents against the node registry
pub struct FlowInterpreter {
    registry: Arc<NodeRegistry>,
    config: InterpreterConfig,
    placeholder: Regex,
}

impl FlowInterpreter {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_config(registry, InterpreterConfig::default())
    }

    pub fn with_config(registry: Arc<NodeRegistry>, config: InterpreterConfig) -> Self {
        Self {
            registry,
            config,
            placeholder: Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}")
                .expect("static placeholder pattern is valid"),
        }
    }

    /// Run a workflow to its terminal result.
    ///
    /// Emits the full lifecycle event sequence through `ctx` and leaves the
    /// context in a terminal status.
    pub async fn run(
        &self,
        workflow: &Workflow,
        state: &mut StateStore,
        ctx: &RuntimeContext,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        ctx.emit(
            EventType::WorkflowStarted,
            json!({
                "workflowName": workflow.name,
                "initialState": state.snapshot(),
            }),
        );

        let result = self.run_sequence(&workflow.nodes, state, ctx, started).await;
        match result {
            Ok(FrameSignal::Completed) => self.finish_completed(state, ctx, None),
            Ok(FrameSignal::Exit) => {
                self.finish_completed(state, ctx, Some(EXIT_SIGNAL_EXPLICIT.to_string()))
            }
            Ok(FrameSignal::Cancelled) => self.finish_cancelled(state, ctx),
            Err(FlowError::Cancelled) if ctx.cancel_requested() => {
                self.finish_cancelled(state, ctx)
            }
            Err(e) => self.finish_failed(state, ctx, e),
        }
    }

    fn finish_completed(
        &self,
        state: &StateStore,
        ctx: &RuntimeContext,
        exit_signal: Option<String>,
    ) -> ExecutionOutcome {
        let snapshot = state.snapshot();
        ctx.emit(
            EventType::WorkflowCompleted,
            json!({"finalState": snapshot.clone(), "exitSignal": exit_signal.clone()}),
        );
        ctx.finish(ExecutionStatus::Completed);
        ExecutionOutcome {
            completed: true,
            exit_signal,
            state: snapshot,
            error: None,
        }
    }

    fn finish_cancelled(&self, state: &StateStore, ctx: &RuntimeContext) -> ExecutionOutcome {
        let snapshot = state.snapshot();
        ctx.emit(
            EventType::WorkflowCompleted,
            json!({"finalState": snapshot.clone(), "exitSignal": EXIT_SIGNAL_CANCELLED}),
        );
        ctx.finish(ExecutionStatus::Stopped);
        ExecutionOutcome {
            completed: false,
            exit_signal: Some(EXIT_SIGNAL_CANCELLED.to_string()),
            state: snapshot,
            error: None,
        }
    }

    fn finish_failed(
        &self,
        state: &StateStore,
        ctx: &RuntimeContext,
        error: FlowError,
    ) -> ExecutionOutcome {
        let snapshot = state.snapshot();
        let info = ErrorInfo::from(&error);
        ctx.emit(
            EventType::WorkflowFailed,
            json!({"error": info.clone(), "state": snapshot.clone()}),
        );
        ctx.finish(ExecutionStatus::Failed);
        ExecutionOutcome {
            completed: false,
            exit_signal: None,
            state: snapshot,
            error: Some(info),
        }
    }

    /// Run one frame: an element list with its own program counter.
    fn run_sequence<'a>(
        &'a self,
        elements: &'a [FlowElement],
        state: &'a mut StateStore,
        ctx: &'a RuntimeContext,
        started: Instant,
    ) -> BoxFuture<'a, Result<FrameSignal>> {
        Box::pin(async move {
            let mut pc = 0usize;
            while pc < elements.len() {
                self.check_budget(started)?;
                if ctx.cancel_requested() {
                    return Ok(FrameSignal::Cancelled);
                }

                match &elements[pc] {
                    element @ (FlowElement::Reference(_) | FlowElement::Configured { .. }) => {
                        let outcome = self.dispatch_node(element, state, ctx).await?;
                        // A cancel that landed mid-node discards the edge.
                        if ctx.cancel_requested() {
                            return Ok(FrameSignal::Cancelled);
                        }
                        match self.apply_edge(outcome, elements, state, ctx)? {
                            EdgeAction::Advance => pc += 1,
                            EdgeAction::Jump(index) => pc = index,
                            EdgeAction::Exit => return Ok(FrameSignal::Exit),
                        }
                    }

                    FlowElement::Branch {
                        condition,
                        branches,
                    } => {
                        let outcome = self.dispatch_node(condition, state, ctx).await?;
                        if ctx.cancel_requested() {
                            return Ok(FrameSignal::Cancelled);
                        }

                        // Control edges from the condition resolve in this frame.
                        if outcome.edge == EDGE_EXIT {
                            return Ok(FrameSignal::Exit);
                        }
                        if let Some(target) = outcome.edge.strip_prefix(EDGE_LOOP_TO_PREFIX) {
                            pc = find_loop_target(elements, target)?;
                            continue;
                        }

                        let NodeOutcome {
                            node_name,
                            edge,
                            payload,
                        } = outcome;
                        let message = error_message(&payload);
                        self.merge_edge_payload(state, ctx, payload)?;

                        match branches.get(&edge) {
                            Some(BranchTarget::Skip) => {}
                            Some(BranchTarget::Element(element)) => {
                                let body = std::slice::from_ref(element.as_ref());
                                match self.run_sequence(body, state, ctx, started).await? {
                                    FrameSignal::Completed => {}
                                    signal => return Ok(signal),
                                }
                            }
                            Some(BranchTarget::Sequence(body)) => {
                                match self.run_sequence(body, state, ctx, started).await? {
                                    FrameSignal::Completed => {}
                                    signal => return Ok(signal),
                                }
                            }
                            None if edge == EDGE_ERROR => {
                                return Err(FlowError::NodeFailed {
                                    node: node_name,
                                    message,
                                });
                            }
                            // No matching branch is legal; the next element runs.
                            None => {
                                debug!(edge = %edge, "branch has no mapping for edge; skipping");
                            }
                        }
                        pc += 1;
                    }

                    FlowElement::Loop { controller, body } => {
                        loop {
                            self.check_budget(started)?;
                            if ctx.cancel_requested() {
                                return Ok(FrameSignal::Cancelled);
                            }

                            let outcome = self.dispatch_node(controller, state, ctx).await?;
                            if ctx.cancel_requested() {
                                return Ok(FrameSignal::Cancelled);
                            }
                            match outcome.edge.as_str() {
                                EDGE_EXIT_LOOP => break,
                                EDGE_NEXT_ITERATION => {
                                    self.merge_edge_payload(state, ctx, outcome.payload)?;
                                    match self.run_sequence(body, state, ctx, started).await? {
                                        FrameSignal::Completed => {}
                                        signal => return Ok(signal),
                                    }
                                }
                                other => {
                                    return Err(FlowError::InvalidLoopEdge {
                                        node: outcome.node_name,
                                        edge: other.to_string(),
                                    })
                                }
                            }
                        }
                        pc += 1;
                    }
                }
            }
            Ok(FrameSignal::Completed)
        })
    }

    /// Resolve, configure, and execute a single node element.
    async fn dispatch_node(
        &self,
        element: &FlowElement,
        state: &mut StateStore,
        ctx: &RuntimeContext,
    ) -> Result<NodeOutcome> {
        let (name, raw_config) = match element {
            FlowElement::Reference(name) => (name.as_str(), Value::Object(Map::new())),
            FlowElement::Configured { name, config } => (name.as_str(), config.clone()),
            _ => unreachable!("only node elements are dispatched"),
        };

        let node = self
            .registry
            .get(name)
            .ok_or_else(|| FlowError::UnknownNode(name.to_string()))?;
        let node_id = ctx.next_node_id(name);
        ctx.set_current_node(Some(node_id.clone()));

        let config = self.interpolate(&raw_config, state);
        ctx.emit(
            EventType::NodeExecuting,
            json!({
                "nodeId": node_id.clone(),
                "nodeName": name,
                "nodeType": node.metadata().kind,
            }),
        );

        let policy = self.config.node_policies.get(name);
        let result = self
            .execute_with_policy(node.as_ref(), policy, state, config, ctx, &node_id)
            .await;

        let outcome = match result {
            Ok(edges) => {
                let Some((edge, producer)) = edges.take_first() else {
                    let err = FlowError::NodeFailed {
                        node: name.to_string(),
                        message: "no edges".to_string(),
                    };
                    ctx.emit(
                        EventType::NodeFailed,
                        json!({"nodeId": node_id.clone(), "nodeName": name, "error": err.to_string()}),
                    );
                    ctx.set_current_node(None);
                    return Err(err);
                };
                let payload = producer();
                ctx.emit(
                    EventType::NodeCompleted,
                    json!({
                        "nodeId": node_id.clone(),
                        "nodeName": name,
                        "edge": edge.clone(),
                        "edgeData": payload.clone(),
                    }),
                );
                Ok(NodeOutcome {
                    node_name: name.to_string(),
                    edge,
                    payload,
                })
            }
            Err(e) => {
                if !matches!(e, FlowError::Cancelled) {
                    ctx.emit(
                        EventType::NodeFailed,
                        json!({"nodeId": node_id, "nodeName": name, "error": e.to_string()}),
                    );
                }
                Err(e)
            }
        };
        ctx.set_current_node(None);
        outcome
    }

    async fn execute_with_policy(
        &self,
        node: &dyn Node,
        policy: Option<&NodePolicy>,
        state: &mut StateStore,
        config: Value,
        ctx: &RuntimeContext,
        node_id: &str,
    ) -> Result<EdgeMap> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let call = NodeContext {
                state: &mut *state,
                config: config.clone(),
                runtime: ctx,
                node_id,
            };
            match node.execute(call).await {
                Ok(edges) => return Ok(edges),
                Err(e @ (FlowError::Cancelled | FlowError::ExecutionTerminated)) => return Err(e),
                Err(e) => {
                    let Some(policy) = policy else { return Err(e) };
                    if let Some(retry) = &policy.retry {
                        if retry.should_retry(attempts) {
                            warn!(
                                node = %node.metadata().name,
                                attempts,
                                error = %e,
                                "node failed; retrying"
                            );
                            tokio::time::sleep(retry.delay_for(attempts)).await;
                            continue;
                        }
                    }
                    if policy.error_edge {
                        let message = e.to_string();
                        return Ok(EdgeMap::single(EDGE_ERROR, move || {
                            Some(json!({"error": message}))
                        }));
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Interpret the selected edge at sequence level.
    fn apply_edge(
        &self,
        outcome: NodeOutcome,
        elements: &[FlowElement],
        state: &mut StateStore,
        ctx: &RuntimeContext,
    ) -> Result<EdgeAction> {
        if outcome.edge == EDGE_EXIT {
            return Ok(EdgeAction::Exit);
        }
        if let Some(target) = outcome.edge.strip_prefix(EDGE_LOOP_TO_PREFIX) {
            return Ok(EdgeAction::Jump(find_loop_target(elements, target)?));
        }
        if outcome.edge == EDGE_ERROR {
            return Err(FlowError::NodeFailed {
                node: outcome.node_name,
                message: error_message(&outcome.payload),
            });
        }
        self.merge_edge_payload(state, ctx, outcome.payload)?;
        Ok(EdgeAction::Advance)
    }

    /// Merge an object payload into the state root and announce the delta.
    fn merge_edge_payload(
        &self,
        state: &mut StateStore,
        ctx: &RuntimeContext,
        payload: Option<Value>,
    ) -> Result<()> {
        if let Some(value) = payload {
            if value.is_object() {
                state.update(value.clone())?;
                ctx.emit(EventType::StateUpdated, json!({"updates": value}));
            }
        }
        Ok(())
    }

    fn check_budget(&self, started: Instant) -> Result<()> {
        if started.elapsed() >= self.config.timeout {
            return Err(FlowError::TimeoutExceeded);
        }
        Ok(())
    }

    /// Replace `{{path}}` placeholders with current state values.
    ///
    /// A string that is exactly one placeholder keeps the referenced value's
    /// type; embedded placeholders stringify. Absent or malformed paths yield
    /// the empty string. Substituted values are not re-scanned.
    fn interpolate(&self, config: &Value, state: &StateStore) -> Value {
        match config {
            Value::String(s) => self.interpolate_string(s, state),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.interpolate(v, state)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.interpolate(v, state)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn interpolate_string(&self, s: &str, state: &StateStore) -> Value {
        if let Some(caps) = self.placeholder.captures(s) {
            if let Some(whole) = caps.get(0) {
                if whole.start() == 0 && whole.end() == s.len() {
                    let path = caps[1].trim();
                    return lookup(state, path).unwrap_or_else(|| Value::String(String::new()));
                }
            }
        }

        let replaced = self
            .placeholder
            .replace_all(s, |caps: &regex::Captures<'_>| {
                match lookup(state, caps[1].trim()) {
                    Some(Value::String(text)) => text,
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                }
            });
        Value::String(replaced.into_owned())
    }
}

fn lookup(state: &StateStore, path: &str) -> Option<Value> {
    state.get(path).ok().flatten()
}

fn find_loop_target(elements: &[FlowElement], target: &str) -> Result<usize> {
    elements
        .iter()
        .position(|e| e.node_name() == Some(target))
        .ok_or_else(|| FlowError::TargetNotFound(target.to_string()))
}

fn error_message(payload: &Option<Value>) -> String {
    payload
        .as_ref()
        .and_then(|p| p.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "error edge selected".to_string())
}
