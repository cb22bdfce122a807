//! Deadline utilities for async operations
//!
//! The engine runs whole workflows under an optional wall-clock deadline.
//! Unlike `tokio::time::timeout`'s `Result`-flavored wrappers, the run future
//! here is infallible (it always yields a results map), so the helper wraps
//! plain futures and reports expiry as a dedicated error value.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// The deadline elapsed before the wrapped operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline of {0:?} exceeded")]
pub struct DeadlineExceeded(pub Duration);

/// Execute a future with a wall-clock deadline.
///
/// A zero duration disables the deadline entirely and the future runs to
/// completion.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use nodeflow_tooling::async_utils::with_deadline;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let ok = with_deadline(Duration::from_secs(1), async { 7 }).await;
/// assert_eq!(ok, Ok(7));
///
/// let slow = with_deadline(Duration::from_millis(5), async {
///     tokio::time::sleep(Duration::from_secs(60)).await;
/// })
/// .await;
/// assert!(slow.is_err());
/// # }
/// ```
pub async fn with_deadline<F>(duration: Duration, future: F) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    if duration.is_zero() {
        return Ok(future.await);
    }

    match tokio::time::timeout(duration, future).await {
        Ok(output) => Ok(output),
        Err(_elapsed) => Err(DeadlineExceeded(duration)),
    }
}
