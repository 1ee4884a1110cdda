//! # flowscript-core - Declarative workflow runtime
//!
//! FlowScript workflows are JSON documents of named steps, branches, and
//! loops. This crate is the engine that runs them: it threads a mutable state
//! document through the steps, pauses for human input when a step demands it,
//! and emits lifecycle events as it goes.
//!
//! ## Core Concepts
//!
//! ### 1. Workflow IR
//!
//! A [`Workflow`] is an immutable document whose `nodes` list mixes four
//! element shapes: bare node references, configured nodes, branches, and
//! loops. The shapes are discriminated structurally ([`FlowElement`]) and
//! validated up front ([`validation::validate_workflow`]).
//!
//! ### 2. Nodes
//!
//! A [`Node`] is a stateless singleton registered in a [`NodeRegistry`]. Its
//! `execute` receives `{state, config, runtime}` and returns an [`EdgeMap`]:
//! named outgoing edges with lazily produced payloads.
//!
//! ### 3. Interpretation
//!
//! The [`FlowInterpreter`] walks the document frame by frame, dispatching
//! nodes, selecting edges, merging payloads into state, and honoring the
//! control edges (`exit`, `loopTo:`, `error`) plus a wall-clock budget.
//!
//! ### 4. Human-in-the-loop
//!
//! A node can ask its [`RuntimeContext`] for a [`PauseToken`] and await its
//! resolution; an external caller resumes the token by id through the
//! execution manager. Tokens settle exactly once.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use flowscript_core::{FlowInterpreter, NodeRegistry, RuntimeContext, StateStore};
//! use flowscript_core::event::NullSink;
//! use std::sync::Arc;
//!
//! # async fn example() -> flowscript_core::Result<()> {
//! let registry = Arc::new(NodeRegistry::with_builtins());
//! let workflow = serde_json::from_value(serde_json::json!({
//!     "id": "demo",
//!     "name": "Demo",
//!     "initialState": {"count": 0},
//!     "nodes": [
//!         [{"whileCondition": {"condition": "count < 3"}},
//!          [{"setValue": {"path": "last", "value": "{{count}}"}}]]
//!     ]
//! }))?;
//!
//! let ctx = RuntimeContext::new("demo", "exec-1", Arc::new(NullSink));
//! let mut state = StateStore::from_initial(serde_json::json!({"count": 0}))?;
//! let outcome = FlowInterpreter::new(registry).run(&workflow, &mut state, &ctx).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`flow`] - workflow IR types and shape discrimination
//! - [`validation`] - structural document validation
//! - [`node`] / [`registry`] - the node contract and process registry
//! - [`interpreter`] - the flow interpreter
//! - [`state`] - the path-addressed state document
//! - [`context`] / [`pause`] - runtime façade and pause/resume primitives
//! - [`event`] - lifecycle event types and the delivery seam
//! - [`expression`] - restricted condition evaluator
//! - [`nodes`] - built-in control nodes
//! - [`retry`] - per-node failure policies

pub mod context;
pub mod error;
pub mod event;
pub mod expression;
pub mod flow;
pub mod interpreter;
pub mod node;
pub mod nodes;
pub mod pause;
pub mod registry;
pub mod retry;
pub mod state;
pub mod validation;

pub use context::{ExecutionStatus, RuntimeContext};
pub use error::{ErrorInfo, FlowError, Result};
pub use event::{EventSink, EventType, WorkflowEvent};
pub use flow::{BranchTarget, FlowElement, Workflow};
pub use interpreter::{
    ExecutionOutcome, FlowInterpreter, InterpreterConfig, EXIT_SIGNAL_CANCELLED,
    EXIT_SIGNAL_EXPLICIT,
};
pub use node::{
    EdgeMap, EdgeProducer, Node, NodeContext, NodeKind, NodeMetadata, EDGE_ERROR, EDGE_EXIT,
    EDGE_EXIT_LOOP, EDGE_LOOP_TO_PREFIX, EDGE_NEXT, EDGE_NEXT_ITERATION,
};
pub use pause::{PauseToken, PauseTokenDescriptor};
pub use registry::NodeRegistry;
pub use retry::{NodePolicy, RetryPolicy};
pub use state::{StateChange, StateHook, StateStore};
pub use validation::validate_workflow;
