//! End-to-end scenarios through the execution manager

use async_trait::async_trait;
use flowscript_core::{
    EdgeMap, EventType, ExecutionStatus, InterpreterConfig, Node, NodeContext, NodeKind,
    NodeMetadata, NodeRegistry, Result,
};
use flowscript_runtime::{
    BridgeConfig, EventBridge, EventSubscription, ExecutionManager, LaneEvent, ManagerConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct IncNode {
    metadata: NodeMetadata,
}

#[async_trait]
impl Node for IncNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn execute<'a>(&self, ctx: NodeContext<'a>) -> Result<EdgeMap> {
        let count = ctx
            .state
            .get("count")?
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        ctx.state.set("count", json!(count + 1))?;
        Ok(EdgeMap::next())
    }
}

struct ClassifyNode {
    metadata: NodeMetadata,
}

#[async_trait]
impl Node for ClassifyNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn execute<'a>(&self, ctx: NodeContext<'a>) -> Result<EdgeMap> {
        let n = ctx.state.get("n")?.and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(EdgeMap::signal(if n > 5 { "high" } else { "low" }))
    }
}

/// Marks `ran.<name>` in state; the `edge` field lets one test node double as
/// an exit trigger.
struct MarkNode {
    metadata: NodeMetadata,
    edge: String,
}

#[async_trait]
impl Node for MarkNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn execute<'a>(&self, ctx: NodeContext<'a>) -> Result<EdgeMap> {
        ctx.state
            .set(&format!("ran.{}", self.metadata.name), json!(true))?;
        Ok(EdgeMap::signal(self.edge.clone()))
    }
}

/// Human approval node: announces the input request, pauses, and merges the
/// resume payload into state.
struct ApproveNode {
    metadata: NodeMetadata,
}

#[async_trait]
impl Node for ApproveNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn execute<'a>(&self, ctx: NodeContext<'a>) -> Result<EdgeMap> {
        let token = ctx.runtime.pause(ctx.node_id)?;
        ctx.runtime.emit(
            EventType::HumanInputRequired,
            json!({
                "nodeId": ctx.node_id,
                "nodeName": self.metadata.name.clone(),
                "formSchema": ctx.config.get("formSchema").cloned().unwrap_or(json!({})),
                "uiHints": ctx.config.get("uiHints").cloned().unwrap_or(json!({})),
                "contextData": ctx.state.snapshot(),
                "tokenId": token.id(),
            }),
        );

        let data = ctx.runtime.wait_for_resume(&token).await?;
        Ok(EdgeMap::single("next", move || {
            if data.is_object() {
                Some(data)
            } else {
                None
            }
        }))
    }
}

fn test_registry() -> Arc<NodeRegistry> {
    let registry = NodeRegistry::with_builtins();
    registry.register(Arc::new(IncNode {
        metadata: NodeMetadata::new("inc", NodeKind::Action),
    }));
    registry.register(Arc::new(ClassifyNode {
        metadata: NodeMetadata::new("classify", NodeKind::Control).with_edges(["high", "low"]),
    }));
    for name in ["doH", "doL", "a", "c"] {
        registry.register(Arc::new(MarkNode {
            metadata: NodeMetadata::new(name, NodeKind::Action),
            edge: "next".to_string(),
        }));
    }
    registry.register(Arc::new(MarkNode {
        metadata: NodeMetadata::new("b", NodeKind::Action),
        edge: "exit".to_string(),
    }));
    registry.register(Arc::new(ApproveNode {
        metadata: NodeMetadata::new("approve", NodeKind::Human).with_edges(["next"]),
    }));
    Arc::new(registry)
}

fn manager() -> ExecutionManager {
    ExecutionManager::new(test_registry())
}

/// Collect lifecycle events until (and including) the terminal one.
async fn collect_until_terminal(sub: &mut EventSubscription) -> Vec<flowscript_core::WorkflowEvent> {
    let mut events = Vec::new();
    while let Some(lane_event) = sub.next().await {
        if let LaneEvent::Event(e) = lane_event {
            let terminal = e.event.is_terminal();
            events.push(e);
            if terminal {
                break;
            }
        }
    }
    events
}

#[tokio::test]
async fn scenario_sequential_increment() {
    let m = manager();
    let id = m
        .submit(
            json!({
                "id": "s",
                "name": "sequential",
                "initialState": {"count": 0},
                "nodes": ["inc", "inc"]
            }),
            None,
        )
        .unwrap();

    let mut sub = m.subscribe(&id).unwrap();
    let events = collect_until_terminal(&mut sub).await;

    let types: Vec<EventType> = events.iter().map(|e| e.event).collect();
    assert_eq!(
        types,
        vec![
            EventType::WorkflowStarted,
            EventType::NodeExecuting,
            EventType::NodeCompleted,
            EventType::NodeExecuting,
            EventType::NodeCompleted,
            EventType::WorkflowCompleted,
        ]
    );
    let terminal = events.last().unwrap();
    assert_eq!(terminal.data["finalState"], json!({"count": 2}));
    assert_eq!(m.status(&id).unwrap().status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn scenario_branch_selects_high() {
    let m = manager();
    let id = m
        .submit(
            json!({
                "id": "b",
                "name": "branch",
                "initialState": {"n": 10},
                "nodes": [["classify", {"high": "doH", "low": "doL"}]]
            }),
            None,
        )
        .unwrap();

    let mut sub = m.subscribe(&id).unwrap();
    let events = collect_until_terminal(&mut sub).await;

    let final_state = &events.last().unwrap().data["finalState"];
    assert_eq!(final_state["ran"]["doH"], json!(true));
    assert!(final_state["ran"].get("doL").is_none());
}

#[tokio::test]
async fn scenario_loop_three_times() {
    let m = manager();
    let id = m
        .submit(
            json!({
                "id": "l",
                "name": "loop",
                "initialState": {"count": 0},
                "nodes": [[
                    {"whileCondition": {"condition": "count < 3"}},
                    ["inc"]
                ]]
            }),
            None,
        )
        .unwrap();

    let mut sub = m.subscribe(&id).unwrap();
    let events = collect_until_terminal(&mut sub).await;

    assert_eq!(
        events.last().unwrap().data["finalState"]["count"],
        json!(3)
    );
}

#[tokio::test]
async fn scenario_human_pause_and_resume() {
    let m = manager();
    let id = m
        .submit(
            json!({
                "id": "h",
                "name": "human",
                "initialState": {},
                "nodes": [{"approve": {"formSchema": {"decision": "string"}}}]
            }),
            None,
        )
        .unwrap();

    let mut sub = m.subscribe(&id).unwrap();
    let mut token_id = None;
    let mut saw_paused = false;
    while let Some(lane_event) = sub.next().await {
        if let LaneEvent::Event(e) = lane_event {
            match e.event {
                EventType::WorkflowPaused => {
                    saw_paused = true;
                    token_id = e.data["tokenId"].as_str().map(str::to_string);
                }
                EventType::HumanInputRequired => break,
                _ => {}
            }
        }
    }
    assert!(saw_paused);
    let token_id = token_id.expect("workflow_paused carries the token id");
    assert_eq!(m.status(&id).unwrap().status, ExecutionStatus::Paused);

    m.resume(&id, &token_id, json!({"decision": "approve"})).unwrap();

    let events = collect_until_terminal(&mut sub).await;
    let received = events
        .iter()
        .find(|e| e.event == EventType::HumanInputReceived)
        .expect("human_input_received after resume");
    assert_eq!(received.data["data"]["decision"], json!("approve"));

    let terminal = events.last().unwrap();
    assert_eq!(terminal.event, EventType::WorkflowCompleted);
    assert_eq!(
        terminal.data["finalState"]["decision"],
        json!("approve")
    );
}

#[tokio::test]
async fn scenario_pre_subscription_misses_nothing() {
    let m = manager();
    let id = m
        .submit(
            json!({
                "id": "p",
                "name": "presub",
                "initialState": {"count": 0},
                "nodes": ["inc"]
            }),
            None,
        )
        .unwrap();

    // Attach within the pre-start window.
    let mut sub = m.subscribe(&id).unwrap();
    let events = collect_until_terminal(&mut sub).await;

    assert_eq!(events.first().unwrap().event, EventType::WorkflowStarted);
    assert_eq!(events.last().unwrap().event, EventType::WorkflowCompleted);
}

#[tokio::test]
async fn scenario_timeout_fails_execution() {
    let registry = test_registry();
    let bridge = Arc::new(EventBridge::with_config(
        BridgeConfig::new().with_teardown_grace(Duration::from_millis(50)),
    ));
    let config = ManagerConfig::new()
        .with_interpreter(InterpreterConfig::new().with_timeout(Duration::from_millis(50)));
    let m = ExecutionManager::with_config(registry, bridge, config);

    let id = m
        .submit(
            json!({
                "id": "t",
                "name": "timeout",
                "initialState": {},
                "nodes": [[
                    {"whileCondition": {"condition": "true"}},
                    []
                ]]
            }),
            None,
        )
        .unwrap();

    let mut sub = m.subscribe(&id).unwrap();
    let mut failed = None;
    while let Some(lane_event) = sub.next().await {
        if let LaneEvent::Event(e) = lane_event {
            assert_ne!(
                failed, Some(true),
                "no events may follow workflow_failed"
            );
            if e.event == EventType::WorkflowFailed {
                assert_eq!(e.data["error"]["kind"], json!("TimeoutExceeded"));
                failed = Some(true);
            }
        }
    }
    assert_eq!(failed, Some(true));
    assert_eq!(m.status(&id).unwrap().status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn scenario_exit_edge_skips_rest() {
    let m = manager();
    let id = m
        .submit(
            json!({
                "id": "e",
                "name": "exit",
                "initialState": {},
                "nodes": ["a", "b", "c"]
            }),
            None,
        )
        .unwrap();

    let mut sub = m.subscribe(&id).unwrap();
    let events = collect_until_terminal(&mut sub).await;

    let terminal = events.last().unwrap();
    assert_eq!(terminal.event, EventType::WorkflowCompleted);
    assert_eq!(terminal.data["exitSignal"], json!("explicit_exit"));

    let final_state = &terminal.data["finalState"];
    assert_eq!(final_state["ran"]["a"], json!(true));
    assert_eq!(final_state["ran"]["b"], json!(true));
    assert!(final_state["ran"].get("c").is_none());
}

#[tokio::test]
async fn cancel_while_paused_cancels_tokens_before_terminal() {
    let m = manager();
    let id = m
        .submit(
            json!({
                "id": "cx",
                "name": "cancel",
                "initialState": {},
                "nodes": ["approve"]
            }),
            None,
        )
        .unwrap();

    let mut sub = m.subscribe(&id).unwrap();
    while let Some(lane_event) = sub.next().await {
        if let LaneEvent::Event(e) = lane_event {
            if e.event == EventType::WorkflowPaused {
                break;
            }
        }
    }

    m.cancel(&id).unwrap();

    let events = collect_until_terminal(&mut sub).await;
    let terminal = events.last().unwrap();
    assert_eq!(terminal.event, EventType::WorkflowCompleted);
    assert_eq!(terminal.data["exitSignal"], json!("cancelled"));
    assert_eq!(m.status(&id).unwrap().status, ExecutionStatus::Stopped);

    // A resume after cancellation has nothing to land on.
    assert!(m.resume(&id, "stale", json!({})).is_err());
}

#[tokio::test]
async fn late_subscriber_still_sees_full_history() {
    // Generous grace so the lane outlives the status polling below.
    let bridge = Arc::new(EventBridge::with_config(
        BridgeConfig::new().with_teardown_grace(Duration::from_secs(5)),
    ));
    let m = ExecutionManager::with_config(test_registry(), bridge, ManagerConfig::new());
    let id = m
        .submit(
            json!({
                "id": "late",
                "name": "late",
                "initialState": {"count": 0},
                "nodes": ["inc", "inc", "inc"]
            }),
            None,
        )
        .unwrap();

    // Let the run finish before attaching.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while m.status(&id).unwrap().status != ExecutionStatus::Completed {
        assert!(std::time::Instant::now() < deadline, "run did not finish");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut sub = m.subscribe(&id).unwrap();
    let events = collect_until_terminal(&mut sub).await;
    assert_eq!(events.first().unwrap().event, EventType::WorkflowStarted);
    assert_eq!(
        events.last().unwrap().data["finalState"]["count"],
        json!(3)
    );
}
