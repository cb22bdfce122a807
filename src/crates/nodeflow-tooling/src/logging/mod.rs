//! Logging utilities
//!
//! Provides subscriber initialization plus helper functions for structured
//! logging with tracing.

use std::time::Instant;
use tracing::debug;

/// Initialize the global tracing subscriber from the `RUST_LOG` environment
/// variable, falling back to the given default filter.
///
/// Safe to call more than once; subsequent calls are no-ops.
///
/// # Example
///
/// ```rust
/// nodeflow_tooling::logging::init_logging("info");
/// ```
pub fn init_logging(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Log execution time of a future at debug level.
///
/// # Example
///
/// ```rust,ignore
/// use nodeflow_tooling::logging::timed;
///
/// let result = timed("node demo", run_node()).await;
/// ```
pub async fn timed<F, T>(name: &str, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    debug!("Starting: {}", name);

    let result = future.await;

    let elapsed = start.elapsed();
    debug!("Completed: {} in {:?}", name, elapsed);

    result
}

/// RAII guard that logs scope entry and exit with elapsed time.
///
/// # Example
///
/// ```rust
/// use nodeflow_tooling::logging::LogGuard;
///
/// fn process() {
///     let _guard = LogGuard::new("process");
///     // guard logs the exit when dropped
/// }
/// ```
pub struct LogGuard {
    name: String,
    start: Instant,
}

impl LogGuard {
    /// Create a new log guard.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!("Entering: {}", name);

        Self {
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        debug!("Exiting: {} after {:?}", self.name, self.start.elapsed());
    }
}
