//! Error types for workflow analysis and execution
//!
//! All errors implement `std::error::Error` via the `thiserror` crate.
//!
//! # Error Hierarchy
//!
//! ```text
//! EngineError
//! ├── MalformedGraph     - Workflow structure errors (pre-run, fatal)
//! ├── NodeExecution      - A node handler failed
//! ├── Provider           - Agent-provider adapter failures
//! ├── Tool               - Tool adapter failures
//! ├── SubWorkflow        - A nested engine run ended in error
//! ├── Timeout            - The run deadline elapsed
//! ├── Json / Yaml        - Definition (de)serialization errors
//! └── Execution          - General execution errors
//! ```
//!
//! Handlers return *domain* outcomes (`[Tool 'x' not found]`,
//! `[skipped: error after retries]`, …) as plain string results; only
//! unexpected adapter failures surface as `EngineError` and reach the retry
//! wrapper.

use std::time::Duration;
use thiserror::Error;

/// Boxed error type used at adapter boundaries (providers, tools,
/// broadcasters, file stores). Adapters are external capabilities and report
/// whatever error type they like; the engine wraps them with context.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Convenient result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error type for all workflow analysis and execution failures.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The workflow definition is structurally invalid: an edge references an
    /// unknown node, a node id is duplicated, or a cycle survives back-edge
    /// removal. Fatal before any node runs.
    #[error("Malformed workflow graph: {0}")]
    MalformedGraph(String),

    /// A node handler failed after exhausting its retry budget.
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Id of the node that failed
        node: String,
        /// Error message from the handler
        error: String,
    },

    /// An agent-provider adapter failed (creation or mid-stream).
    #[error("Agent provider error: {0}")]
    Provider(String),

    /// A tool adapter raised while executing.
    #[error("Tool '{name}' failed: {error}")]
    Tool {
        /// Name the tool was registered under
        name: String,
        /// Error message from the adapter
        error: String,
    },

    /// A sub-engine (meta-agent payload or loop body) terminated in error.
    #[error("Sub-workflow under node '{node}' failed: {error}")]
    SubWorkflow {
        /// Id of the parent node that spawned the sub-engine
        node: String,
        /// The sub-engine's terminal error message
        error: String,
    },

    /// The configured run deadline elapsed before completion.
    #[error("Workflow run timed out after {0:?}")]
    Timeout(Duration),

    /// Workflow JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Workflow YAML (de)serialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// General execution error without node context.
    #[error("Execution failed: {0}")]
    Execution(String),
}

impl EngineError {
    /// Create a [`EngineError::NodeExecution`] with context.
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a [`EngineError::Tool`] with context.
    pub fn tool(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Tool {
            name: name.into(),
            error: error.into(),
        }
    }

    /// Create a [`EngineError::SubWorkflow`] with context.
    pub fn sub_workflow(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::SubWorkflow {
            node: node.into(),
            error: error.into(),
        }
    }
}
