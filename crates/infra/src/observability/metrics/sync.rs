//! Drain pass metrics
//!
//! Counts what each pass did and keeps the durations of recent passes for
//! percentile reporting.
//!
//! ## Design
//! - **VecDeque ring buffer** for O(1) eviction of old durations
//! - **Poison-safe locking** with explicit match pattern (no .expect())
//! - **Relaxed ordering**: counters are independent, snapshots are advisory

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use civicsync_domain::SyncSummary;
use serde::Serialize;

use crate::observability::{MetricsError, MetricsResult};

const MAX_DURATION_SAMPLES: usize = 500;

/// Counters for drain passes
#[derive(Debug)]
pub struct SyncMetrics {
    passes: AtomicU64,
    skipped_passes: AtomicU64,
    synced: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    conflicts_resolved: AtomicU64,
    store_errors: AtomicU64,
    halted_offline: AtomicU64,
    pass_durations: Mutex<VecDeque<u64>>,
}

/// Point-in-time copy of [`SyncMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncMetricsSnapshot {
    pub passes: u64,
    pub skipped_passes: u64,
    pub synced: u64,
    pub failed: u64,
    pub retries: u64,
    pub conflicts_resolved: u64,
    pub store_errors: u64,
    pub halted_offline: u64,
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            passes: AtomicU64::new(0),
            skipped_passes: AtomicU64::new(0),
            synced: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            conflicts_resolved: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            halted_offline: AtomicU64::new(0),
            pass_durations: Mutex::new(VecDeque::with_capacity(MAX_DURATION_SAMPLES)),
        }
    }

    /// Record a completed pass
    pub fn record_pass(&self, summary: &SyncSummary, elapsed: Duration) -> MetricsResult<()> {
        self.passes.fetch_add(1, Ordering::Relaxed);
        add(&self.synced, summary.synced, "sync.synced")?;
        add(&self.failed, summary.failed, "sync.failed")?;
        add(&self.retries, summary.retrying, "sync.retries")?;
        add(&self.conflicts_resolved, summary.conflicts_resolved, "sync.conflicts_resolved")?;
        add(&self.store_errors, summary.store_errors.len(), "sync.store_errors")?;
        if summary.halted_offline {
            self.halted_offline.fetch_add(1, Ordering::Relaxed);
        }
        self.record_duration(elapsed)
    }

    /// Record a trigger that found another pass already running
    pub fn record_skipped_pass(&self) -> MetricsResult<()> {
        self.skipped_passes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn record_duration(&self, elapsed: Duration) -> MetricsResult<()> {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        let mut durations = match self.pass_durations.lock() {
            Ok(guard) => guard,
            Err(poison_err) => {
                tracing::warn!(
                    metric = "SyncMetrics::pass_durations",
                    "Mutex poisoned during duration recording, recovering data"
                );
                poison_err.into_inner()
            }
        };

        durations.push_back(ms);
        if durations.len() > MAX_DURATION_SAMPLES {
            durations.pop_front();
        }
        Ok(())
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            skipped_passes: self.skipped_passes.load(Ordering::Relaxed),
            synced: self.synced.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            conflicts_resolved: self.conflicts_resolved.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            halted_offline: self.halted_offline.load(Ordering::Relaxed),
        }
    }

    /// Median pass duration in milliseconds
    ///
    /// Returns `MetricsError::EmptyData` if no pass has been recorded.
    pub fn p50_pass_ms(&self) -> MetricsResult<u64> {
        self.percentile_pass_ms(0.50, "P50")
    }

    /// 95th percentile pass duration in milliseconds
    pub fn p95_pass_ms(&self) -> MetricsResult<u64> {
        self.percentile_pass_ms(0.95, "P95")
    }

    fn percentile_pass_ms(&self, percentile: f64, metric: &'static str) -> MetricsResult<u64> {
        let durations = match self.pass_durations.lock() {
            Ok(guard) => guard,
            Err(poison_err) => poison_err.into_inner(),
        };

        if durations.is_empty() {
            return Err(MetricsError::EmptyData { metric });
        }

        let mut sorted: Vec<u64> = durations.iter().copied().collect();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * percentile) as usize).min(sorted.len() - 1);
        Ok(sorted[index])
    }
}

fn add(counter: &AtomicU64, amount: usize, metric: &'static str) -> MetricsResult<()> {
    let amount = u64::try_from(amount).map_err(|_| MetricsError::Overflow { metric })?;
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| current.checked_add(amount))
        .map(|_| ())
        .map_err(|_| MetricsError::Overflow { metric })
}
