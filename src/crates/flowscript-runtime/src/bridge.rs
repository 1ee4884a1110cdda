//! Event bridge: per-execution lanes with buffering and fan-out
//!
//! Sits between runtime contexts and external subscribers. Every event is
//! routed by execution id to a lane. A lane buffers events until its first
//! subscriber attaches, then streams live; attaching drains the backlog in
//! order, announces catch-up, and never loses events emitted before the
//! attach. Lanes are independent: a slow subscriber cannot stall another
//! lane, and a closed subscriber is detached in isolation.

use flowscript_core::event::{EventSink, WorkflowEvent};
use flowscript_core::{FlowError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

/// What a subscriber sees on its stream.
///
/// Lifecycle events pass through as [`LaneEvent::Event`]; the catch-up
/// confirmation and overflow warnings are bridge-level markers, kept out of
/// the closed lifecycle event set.
#[derive(Debug, Clone)]
pub enum LaneEvent {
    /// A lifecycle event from the execution
    Event(WorkflowEvent),
    /// The backlog has been drained; subsequent events are live
    CaughtUp,
    /// The lane's buffer overflowed before this subscriber attached and the
    /// oldest `count` events were dropped
    Dropped { count: u64 },
}

/// Bridge tuning knobs
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Buffered events per lane before the oldest is dropped
    pub buffer_capacity: usize,
    /// Delay between a terminal event and lane eviction
    pub teardown_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            teardown_grace: Duration::from_millis(250),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = grace;
        self
    }
}

struct Lane {
    buffer: VecDeque<WorkflowEvent>,
    dropped: u64,
    subscribers: Vec<mpsc::UnboundedSender<LaneEvent>>,
}

impl Lane {
    fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
            dropped: 0,
            subscribers: Vec::new(),
        }
    }
}

/// Per-execution event buffering and fan-out
pub struct EventBridge {
    lanes: Mutex<HashMap<String, Lane>>,
    config: BridgeConfig,
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBridge {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Create the lane for an execution. Idempotent.
    pub fn open_lane(&self, execution_id: &str) {
        self.lanes
            .lock()
            .unwrap()
            .entry(execution_id.to_string())
            .or_insert_with(Lane::new);
    }

    /// Whether a lane exists for the execution
    pub fn has_lane(&self, execution_id: &str) -> bool {
        self.lanes.lock().unwrap().contains_key(execution_id)
    }

    /// Route an event to its lane: deliver live when subscribers exist,
    /// buffer otherwise. Never blocks.
    ///
    /// A terminal event schedules lane eviction after the configured grace
    /// period.
    pub fn publish(self: &Arc<Self>, event: WorkflowEvent) {
        let execution_id = event.execution_id.clone();
        let terminal = event.event.is_terminal();

        {
            let mut lanes = self.lanes.lock().unwrap();
            let lane = match lanes.get_mut(&execution_id) {
                Some(lane) => lane,
                None => {
                    debug!(execution_id = %execution_id, "event for unknown lane dropped");
                    return;
                }
            };

            if lane.subscribers.is_empty() {
                if lane.buffer.len() >= self.config.buffer_capacity {
                    lane.buffer.pop_front();
                    lane.dropped += 1;
                    warn!(
                        execution_id = %execution_id,
                        dropped = lane.dropped,
                        "lane buffer full; dropped oldest event"
                    );
                }
                lane.buffer.push_back(event);
            } else {
                let before = lane.subscribers.len();
                lane.subscribers
                    .retain(|tx| tx.send(LaneEvent::Event(event.clone())).is_ok());
                if lane.subscribers.len() < before {
                    debug!(
                        execution_id = %execution_id,
                        detached = before - lane.subscribers.len(),
                        "detached closed subscribers"
                    );
                }
            }
        }

        if terminal {
            let bridge = self.clone();
            let grace = self.config.teardown_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                bridge.close_lane(&execution_id);
            });
        }
    }

    /// Attach a subscriber to an execution's lane.
    ///
    /// The subscription first yields any overflow marker, then the buffered
    /// backlog in emission order, then [`LaneEvent::CaughtUp`], then live
    /// events. Lane eviction ends the stream.
    pub fn subscribe(&self, execution_id: &str) -> Result<EventSubscription> {
        let mut lanes = self.lanes.lock().unwrap();
        let lane = lanes
            .get_mut(execution_id)
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        if lane.dropped > 0 {
            let _ = tx.send(LaneEvent::Dropped {
                count: lane.dropped,
            });
            lane.dropped = 0;
        }
        for event in lane.buffer.drain(..) {
            let _ = tx.send(LaneEvent::Event(event));
        }
        let _ = tx.send(LaneEvent::CaughtUp);
        lane.subscribers.push(tx);

        Ok(EventSubscription {
            execution_id: execution_id.to_string(),
            receiver: rx,
        })
    }

    /// Evict a lane, ending every subscriber's stream
    pub fn close_lane(&self, execution_id: &str) {
        if self.lanes.lock().unwrap().remove(execution_id).is_some() {
            debug!(execution_id = %execution_id, "lane evicted");
        }
    }

    /// Number of live lanes
    pub fn lane_count(&self) -> usize {
        self.lanes.lock().unwrap().len()
    }
}

/// A subscriber's handle on one execution's event stream
pub struct EventSubscription {
    execution_id: String,
    receiver: mpsc::UnboundedReceiver<LaneEvent>,
}

impl EventSubscription {
    /// Execution this subscription watches
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Next lane event; `None` once the lane is evicted
    pub async fn next(&mut self) -> Option<LaneEvent> {
        self.receiver.recv().await
    }

    /// Adapt into a `futures` stream
    pub fn into_stream(self) -> UnboundedReceiverStream<LaneEvent> {
        UnboundedReceiverStream::new(self.receiver)
    }
}

/// [`EventSink`] adapter handing context events to a shared bridge
#[derive(Clone)]
pub struct BridgeSink {
    bridge: Arc<EventBridge>,
}

impl BridgeSink {
    pub fn new(bridge: Arc<EventBridge>) -> Self {
        Self { bridge }
    }
}

impl EventSink for BridgeSink {
    fn deliver(&self, event: WorkflowEvent) {
        self.bridge.publish(event);
    }
}
