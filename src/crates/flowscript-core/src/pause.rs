//! One-shot pause tokens for human-in-the-loop coordination
//!
//! A node that needs external input asks its runtime context for a
//! [`PauseToken`], then awaits [`PauseToken::wait`]. The execution manager
//! later settles the token by id — resume with a payload, reject with an
//! error, or cancel. A token settles at most once; every later settle (or a
//! second `wait`) fails with `TokenSettled`.

use crate::error::{FlowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Serializable identity of a pause token. Never carries the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseTokenDescriptor {
    /// Unique token id
    pub id: String,
    /// Workflow document id
    pub workflow_id: String,
    /// Execution that issued the token
    pub execution_id: String,
    /// Node that was executing when the token was issued
    pub node_id: String,
    /// Issue time
    pub created_at: DateTime<Utc>,
}

/// One-shot future a node awaits to block its execution until an external
/// resume arrives
pub struct PauseToken {
    descriptor: PauseTokenDescriptor,
    tx: Mutex<Option<oneshot::Sender<Result<Value>>>>,
    rx: Mutex<Option<oneshot::Receiver<Result<Value>>>>,
}

impl std::fmt::Debug for PauseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PauseToken")
            .field("descriptor", &self.descriptor)
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl PauseToken {
    /// Mint a fresh unsettled token
    pub(crate) fn new(workflow_id: &str, execution_id: &str, node_id: &str) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            descriptor: PauseTokenDescriptor {
                id: Uuid::new_v4().to_string(),
                workflow_id: workflow_id.to_string(),
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
                created_at: Utc::now(),
            },
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Unique token id
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Serializable descriptor for transport to external callers
    pub fn descriptor(&self) -> &PauseTokenDescriptor {
        &self.descriptor
    }

    /// Await settlement. Yields the resume payload, or the rejection /
    /// cancellation error. A second `wait` fails with `TokenSettled`.
    pub async fn wait(&self) -> Result<Value> {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or(FlowError::TokenSettled)?;
        match rx.await {
            Ok(outcome) => outcome,
            // Sender dropped without settling: the owning context went away.
            Err(_) => Err(FlowError::Cancelled),
        }
    }

    /// Resume the waiting node with a payload
    pub fn resume(&self, data: Value) -> Result<()> {
        self.settle(Ok(data))
    }

    /// Reject the waiting node with an error
    pub fn reject(&self, error: FlowError) -> Result<()> {
        self.settle(Err(error))
    }

    /// Cancel the token; the waiter observes `Cancelled`
    pub fn cancel(&self) -> Result<()> {
        self.settle(Err(FlowError::Cancelled))
    }

    /// Cancel with a specific error kind (timeouts use `HumanInputTimeout`)
    pub(crate) fn cancel_with(&self, error: FlowError) -> Result<()> {
        self.settle(Err(error))
    }

    /// Whether the token has already been settled
    pub fn is_settled(&self) -> bool {
        self.tx.lock().unwrap().is_none()
    }

    fn settle(&self, outcome: Result<Value>) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .unwrap()
            .take()
            .ok_or(FlowError::TokenSettled)?;
        // The waiter may have been dropped already; settlement still counts.
        let _ = tx.send(outcome);
        Ok(())
    }
}
