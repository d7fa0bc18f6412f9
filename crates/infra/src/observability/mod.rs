//! Observability infrastructure for logging and drain metrics
//!
//! ## Design Principles
//!
//! 1. **Poison Recovery**: metric locks recover the inner data on poison
//!    instead of panicking.
//!
//! 2. **Result Returns**: record methods return `MetricsResult<()>` so callers
//!    log and drop a failed sample (see `log_metric` in the scheduler); a
//!    metric never aborts a drain.
//!
//! 3. **Ring Buffers**: VecDeque for O(1) eviction of old samples.

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};

/// Metrics error type
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Empty data set - cannot calculate aggregate metric
    #[error("Empty data: cannot calculate {metric}")]
    EmptyData {
        /// Metric name that failed (e.g., "P95", "P50")
        metric: &'static str,
    },

    /// Counter would overflow
    #[error("Counter overflow for metric '{metric}'")]
    Overflow {
        /// Metric name
        metric: &'static str,
    },
}

/// Result type for metrics operations
pub type MetricsResult<T> = Result<T, MetricsError>;
