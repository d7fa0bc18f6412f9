//! Sync scheduler that turns drain triggers into drain passes.
//!
//! A pass runs when any of these happens:
//! - the queue manager raises its drain signal (enqueue while online, or the
//!   connectivity monitor settling on online)
//! - the periodic interval elapses while online
//! - the earliest backoff deadline among pending items is reached
//!
//! While offline only the drain signal can wake the loop, so no pass is
//! attempted until connectivity returns.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use civicsync_core::{ConnectivityMonitor, SyncOrchestrator};
//! use civicsync_infra::observability::SyncMetrics;
//! use civicsync_infra::scheduling::{SyncScheduler, SyncSchedulerConfig};
//!
//! # async fn example(
//! #     orchestrator: Arc<SyncOrchestrator>,
//! #     monitor: Arc<ConnectivityMonitor>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let mut scheduler = SyncScheduler::new(
//!     orchestrator,
//!     monitor,
//!     SyncSchedulerConfig::default(),
//!     Arc::new(SyncMetrics::new()),
//! );
//!
//! scheduler.start().await?;
//! // ... application runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use civicsync_core::{ConnectivityMonitor, PassReport, QueueManager, Subscription, SyncOrchestrator};
use civicsync_domain::{ConnectivityState, SyncConfig};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::observability::{MetricsResult, SyncMetrics};
use crate::scheduling::error::{SchedulerError, SchedulerResult};

/// Type alias for task handle to avoid complexity warnings
type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Configuration for sync scheduler
#[derive(Debug, Clone)]
pub struct SyncSchedulerConfig {
    /// Periodic drain interval while online
    pub interval: Duration,
    /// When false, `start` leaves the scheduler idle
    pub enabled: bool,
    /// Upper bound for joining the loop on stop
    pub join_timeout: Duration,
}

impl Default for SyncSchedulerConfig {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl SyncSchedulerConfig {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_seconds.max(1)),
            enabled: config.enabled,
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Context for the drain loop to avoid too many arguments (clippy)
struct DrainLoopContext {
    orchestrator: Arc<SyncOrchestrator>,
    monitor: Arc<ConnectivityMonitor>,
    drain_signal: Arc<Notify>,
    metrics: Arc<SyncMetrics>,
}

/// Background driver for drain passes
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    monitor: Arc<ConnectivityMonitor>,
    config: SyncSchedulerConfig,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
    subscription: Option<Subscription>,
    metrics: Arc<SyncMetrics>,
}

impl SyncScheduler {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        monitor: Arc<ConnectivityMonitor>,
        config: SyncSchedulerConfig,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            orchestrator,
            monitor,
            config,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
            subscription: None,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    /// Ask for a drain pass as soon as possible ("sync now")
    pub fn trigger(&self) {
        self.orchestrator.manager().drain_signal().notify_one();
    }

    /// Start the scheduler
    ///
    /// Recovers items interrupted by a previous crash, subscribes to
    /// connectivity changes and spawns the drain loop. A disabled scheduler
    /// stays idle and `start` returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns error if the scheduler is already running or recovery fails
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        if !self.config.enabled {
            info!("Sync disabled by configuration; scheduler stays idle");
            return Ok(());
        }

        info!(interval = ?self.config.interval, "Starting sync scheduler");

        let manager = Arc::clone(self.orchestrator.manager());
        let recovered = manager
            .recover_interrupted()
            .await
            .map_err(|err| SchedulerError::StartFailed(err.to_string()))?;
        if recovered > 0 {
            warn!(recovered, "Re-queued items interrupted by a previous run");
        }

        let drain_signal = manager.drain_signal();
        let trigger = Arc::clone(&drain_signal);
        self.subscription = Some(self.monitor.subscribe(Arc::new(
            move |state: &ConnectivityState| {
                if state.is_online {
                    trigger.notify_one();
                }
            },
        )));

        // Pending work from before the restart drains right away when online
        if self.monitor.is_online() {
            drain_signal.notify_one();
        }

        // Create a new cancellation token (supports restart after stop)
        self.cancellation_token = CancellationToken::new();

        let context = DrainLoopContext {
            orchestrator: Arc::clone(&self.orchestrator),
            monitor: Arc::clone(&self.monitor),
            drain_signal,
            metrics: Arc::clone(&self.metrics),
        };
        let config = self.config.clone();
        let cancel = self.cancellation_token.clone();

        let handle = tokio::spawn(async move {
            Self::drain_loop(context, config, cancel).await;
        });

        *self.task_handle.lock().await = Some(handle);

        info!("Sync scheduler started");
        Ok(())
    }

    /// Stop the scheduler gracefully
    ///
    /// Cancels the loop and awaits completion. A pass in flight finishes its
    /// current item first.
    ///
    /// # Errors
    ///
    /// Returns error if the scheduler is not running or the loop does not
    /// finish within the join timeout
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!("Stopping sync scheduler");

        self.cancellation_token.cancel();
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }

        if let Some(handle) = self.task_handle.lock().await.take() {
            let join_timeout = self.config.join_timeout;
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|_| SchedulerError::Timeout { seconds: join_timeout.as_secs() })?
                .map_err(|err| SchedulerError::TaskJoinFailed(err.to_string()))?;
        }

        info!("Sync scheduler stopped");
        Ok(())
    }

    /// Check if scheduler is running
    ///
    /// A scheduler is considered running if it has an active task handle that
    /// hasn't finished.
    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Background drain loop
    async fn drain_loop(
        context: DrainLoopContext,
        config: SyncSchedulerConfig,
        cancel: CancellationToken,
    ) {
        let DrainLoopContext { orchestrator, monitor, drain_signal, metrics } = context;

        loop {
            let wake = next_wake(orchestrator.manager(), &monitor, config.interval).await;

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Drain loop cancelled");
                    break;
                }
                _ = drain_signal.notified() => {
                    Self::run_pass(&orchestrator, &metrics, "signal").await;
                }
                _ = sleep_or_pending(wake) => {
                    Self::run_pass(&orchestrator, &metrics, "timer").await;
                }
            }
        }
    }

    async fn run_pass(orchestrator: &SyncOrchestrator, metrics: &SyncMetrics, trigger: &'static str) {
        let started = Instant::now();

        match orchestrator.drain().await {
            Ok(PassReport::Completed(summary)) => {
                if summary.attempted() > 0 || summary.halted_offline {
                    info!(
                        trigger,
                        synced = summary.synced,
                        failed = summary.failed,
                        retrying = summary.retrying,
                        conflicts = summary.conflicts_resolved,
                        halted_offline = summary.halted_offline,
                        "Drain pass completed"
                    );
                } else {
                    debug!(trigger, "Drain pass found nothing due");
                }
                for store_error in &summary.store_errors {
                    warn!(trigger, error = %store_error, "Store error during drain pass");
                }
                log_metric(metrics.record_pass(&summary, started.elapsed()), "scheduler.sync.pass");
            }
            Ok(PassReport::AlreadyRunning) => {
                debug!(trigger, "Drain pass skipped, another pass is running");
                log_metric(metrics.record_skipped_pass(), "scheduler.sync.skipped");
            }
            Err(err) => {
                error!(trigger, error = %err, "Drain pass failed");
            }
        }
    }
}

/// How long to sleep before the next timer-driven pass
///
/// `None` while offline: only the drain signal may wake the loop then.
async fn next_wake(
    manager: &QueueManager,
    monitor: &ConnectivityMonitor,
    interval: Duration,
) -> Option<Duration> {
    if !monitor.is_online() {
        return None;
    }

    let retry_in = match manager.next_retry_at().await {
        Ok(Some(deadline)) => {
            Some((deadline - manager.clock().now()).to_std().unwrap_or(Duration::ZERO))
        }
        Ok(None) => None,
        Err(err) => {
            warn!(error = %err, "Failed to read next retry deadline");
            None
        }
    };

    Some(retry_in.map_or(interval, |delay| delay.min(interval)))
}

async fn sleep_or_pending(wake: Option<Duration>) {
    match wake {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending::<()>().await,
    }
}

fn log_metric(result: MetricsResult<()>, metric: &'static str) {
    if let Err(err) = result {
        warn!(metric = metric, error = ?err, "Failed to record scheduler metric");
    }
}

/// Ensure scheduler is stopped when dropped
impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if self.is_running() && !self.cancellation_token.is_cancelled() {
            warn!("SyncScheduler dropped while running; cancelling");
            self.cancellation_token.cancel();
        }
    }
}
