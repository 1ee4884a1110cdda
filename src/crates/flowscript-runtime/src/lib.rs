//! Execution management for FlowScript workflows
//!
//! This crate layers run coordination on top of `flowscript-core`: the
//! [`ExecutionManager`] multiplexes concurrent executions, brokers
//! pause-token resumes, and enforces the subscribe-before-start ordering;
//! the [`EventBridge`] buffers and fans out each execution's lifecycle
//! events to transport-neutral subscribers.

pub mod bridge;
pub mod manager;

pub use bridge::{BridgeConfig, BridgeSink, EventBridge, EventSubscription, LaneEvent};
pub use manager::{ExecutionManager, ExecutionStatusRecord, ManagerConfig};
