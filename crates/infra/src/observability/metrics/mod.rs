//! Metrics collection modules
//!
//! Thread-safe metrics for the drain loop.

pub mod sync;

pub use sync::{SyncMetrics, SyncMetricsSnapshot};
