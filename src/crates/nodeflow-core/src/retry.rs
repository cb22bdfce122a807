//! Per-node retry and error policy
//!
//! Every node execution runs through this wrapper. The node's data
//! configures how many extra attempts to make, the backoff base, and what
//! happens once attempts are exhausted:
//!
//! - `stop` (default) - the error propagates and fails the run
//! - `skip` - the node completes with the literal `[skipped: error after retries]`
//! - `fallback` - the node completes with the configured `fallbackValue`
//!
//! Expected domain outcomes (unknown tool, recursion cap, losing branch)
//! are plain string results and never reach this wrapper; only raised
//! adapter/handler errors do.

use futures::future::BoxFuture;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;
use crate::workflow::NodeData;

/// Result literal for nodes exhausted under the `skip` policy.
pub const SKIPPED_RESULT: &str = "[skipped: error after retries]";

/// What to do when a node keeps failing after all retries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Re-raise and fail the run
    #[default]
    Stop,
    /// Complete with [`SKIPPED_RESULT`]
    Skip,
    /// Complete with the configured fallback value
    Fallback,
}

impl ErrorPolicy {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "skip" => ErrorPolicy::Skip,
            "fallback" => ErrorPolicy::Fallback,
            _ => ErrorPolicy::Stop,
        }
    }
}

/// Retry configuration resolved from node data.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySpec {
    /// Extra attempts after the first (default 0)
    pub retry_count: u32,
    /// Backoff base; attempt `n` sleeps `retry_delay × (n + 1)` (default 2 s)
    pub retry_delay: Duration,
    pub on_error: ErrorPolicy,
    pub fallback_value: String,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            retry_count: 0,
            retry_delay: Duration::from_secs(2),
            on_error: ErrorPolicy::Stop,
            fallback_value: String::new(),
        }
    }
}

impl RetrySpec {
    /// Read `retryCount` / `retryDelay` / `onError` / `fallbackValue` from
    /// node data, with the documented defaults.
    pub fn from_data(data: &NodeData) -> Self {
        Self {
            retry_count: data.u64_or("retryCount", 0) as u32,
            retry_delay: Duration::from_secs_f64(data.f64_or("retryDelay", 2.0).max(0.0)),
            on_error: ErrorPolicy::parse(&data.str_or("onError", "stop")),
            fallback_value: data.str_or("fallbackValue", ""),
        }
    }
}

/// Run `attempt` under the retry spec. `node_id` is used only for logging.
pub async fn execute_with_retry<'a, F>(node_id: &str, spec: &RetrySpec, mut attempt: F) -> Result<String>
where
    F: FnMut() -> BoxFuture<'a, Result<String>>,
{
    let mut last_error = None;

    for attempt_no in 0..=spec.retry_count {
        match attempt().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                warn!(
                    node = node_id,
                    attempt = attempt_no + 1,
                    attempts = spec.retry_count + 1,
                    "node attempt failed: {}",
                    error
                );
                last_error = Some(error);
                if attempt_no < spec.retry_count {
                    let delay = spec.retry_delay * (attempt_no + 1);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    let error = last_error.unwrap_or_else(|| {
        crate::error::EngineError::Execution("retry loop finished without an attempt".to_string())
    });

    match spec.on_error {
        ErrorPolicy::Stop => Err(error),
        ErrorPolicy::Skip => Ok(SKIPPED_RESULT.to_string()),
        ErrorPolicy::Fallback => Ok(spec.fallback_value.clone()),
    }
}
