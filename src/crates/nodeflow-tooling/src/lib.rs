//! Tooling utilities shared across the nodeflow workspace.
//!
//! This crate carries the ambient helpers the engine leans on but that are
//! not part of the workflow-execution domain itself:
//!
//! - [`logging`] - tracing subscriber setup and instrumentation helpers
//! - [`async_utils`] - deadline supervision for async operations

pub mod async_utils;
pub mod logging;

pub use async_utils::{with_deadline, DeadlineExceeded};
pub use logging::{init_logging, timed, LogGuard};
