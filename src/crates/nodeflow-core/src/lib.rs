//! # nodeflow-core - Workflow Execution Engine
//!
//! Interprets a user-defined directed graph of heterogeneous nodes (AI-model
//! calls, tool invocations, control-flow primitives, text chunkers, and
//! recursive sub-workflows) and executes it with level-parallel scheduling,
//! token-level streaming, retry/fallback semantics, variable propagation,
//! and real-time progress broadcasting.
//!
//! ## Architecture
//!
//! - [`workflow`] - the immutable `(Nodes, Edges)` definition model
//! - [`graph`] - back-edge detection, topological levels, loop bodies
//! - [`engine`] - the [`WorkflowEngine`]: per-run state, scheduler, handlers
//! - [`provider`] / [`tool`] - adapter contracts for agents and tools
//! - [`broadcast`] - the write-only event sink observers subscribe through
//! - [`retry`] - per-node retry and on-error policy
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nodeflow_core::{WorkflowDefinition, WorkflowEngine};
//!
//! let definition = WorkflowDefinition::from_json_str(workflow_json)?;
//! let engine = WorkflowEngine::new(definition, "run-1")
//!     .with_agent_factory(agents)
//!     .with_tool_registry(tools)
//!     .with_broadcaster(broadcaster);
//!
//! // Never fails: a fatal condition is reflected in `engine.status()`,
//! // the terminal broadcast, and the (possibly partial) results map.
//! let results = engine.run("initial input").await;
//! ```
//!
//! The engine owns all per-run mutable state exclusively for the run's
//! lifetime and introduces no global state; every collaborator (agent
//! factory, tool registry, file store, usage sink, broadcaster) is passed
//! in at construction.

pub mod broadcast;
pub mod engine;
pub mod error;
pub mod graph;
pub mod provider;
pub mod retry;
pub mod text;
pub mod tool;
pub mod workflow;

pub use broadcast::{Broadcaster, ChannelBroadcaster, Event, MemoryBroadcaster};
pub use engine::{WorkflowEngine, DEFAULT_MODEL, DEFAULT_RUN_TIMEOUT, JOIN_SEPARATOR};
pub use error::{BoxedError, EngineError, Result};
pub use graph::GraphAnalysis;
pub use provider::{
    AgentConfig, AgentFactory, AgentProvider, ChatMessage, FileStore, TokenStream, UsageRecord,
    UsageSink,
};
pub use retry::{ErrorPolicy, RetrySpec, SKIPPED_RESULT};
pub use tool::{Tool, ToolConfig, ToolRegistry};
pub use workflow::{
    NodeData, NodeId, NodeKind, NodeState, RunStatus, WorkflowDefinition, WorkflowEdge,
    WorkflowNode,
};
