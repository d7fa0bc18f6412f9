//! Submission queue manager.
//!
//! The manager is the only component that changes item status. A drain pass
//! snapshots the due `pending` items, claims them one at a time and hands
//! each to an [`ItemProcessor`]; the processor answers with a
//! [`Disposition`] that the manager writes back to the store.
//!
//! Every status write is checked against [`ItemStatus::can_transition_to`]
//! using the stored item, so a concurrent change is refused rather than
//! overwritten.
//!
//! Only one pass runs at a time. A second caller gets
//! [`PassReport::AlreadyRunning`] instead of waiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civicsync_domain::{
    EntityType, ItemError, ItemStatus, Operation, OutcomeKind, QueueFilter, QueueItem,
    QueueItemPatch, StatusCounts, SyncOutcome, SyncSummary,
};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::ports::{ConnectivityProbe, QueueStore};
use crate::queue::errors::{QueueError, QueueResult};
use crate::retry::BackoffPolicy;

/// Decision for a claimed item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Accepted by the server
    Synced { server_id: String, via_conflict: bool },
    /// Try again after `delay` unless the item is out of attempts
    Retry { error: ItemError, delay: Duration },
    /// Give up now
    Failed { error: ItemError },
}

/// Submits one claimed item and decides what happens to it
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, item: &QueueItem) -> Disposition;
}

/// Result of asking for a drain pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassReport {
    Completed(SyncSummary),
    /// Another pass held the single-flight guard
    AlreadyRunning,
}

impl PassReport {
    pub fn summary(&self) -> Option<&SyncSummary> {
        match self {
            Self::Completed(summary) => Some(summary),
            Self::AlreadyRunning => None,
        }
    }
}

/// Owner of queue item lifecycle
pub struct QueueManager {
    store: Arc<dyn QueueStore>,
    connectivity: Arc<dyn ConnectivityProbe>,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
    drain_signal: Arc<Notify>,
    pass_guard: Mutex<()>,
}

impl QueueManager {
    pub fn new(
        store: Arc<dyn QueueStore>,
        connectivity: Arc<dyn ConnectivityProbe>,
        backoff: BackoffPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            connectivity,
            backoff,
            clock,
            drain_signal: Arc::new(Notify::new()),
            pass_guard: Mutex::new(()),
        }
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Raised whenever a drain would be useful; the scheduler waits on it
    pub fn drain_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.drain_signal)
    }

    /// Append a write to the queue
    ///
    /// Succeeds without connectivity. Raises the drain signal when online.
    #[instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        entity_type: EntityType,
        operation: Operation,
        payload: Value,
    ) -> QueueResult<String> {
        let item = QueueItem::new(entity_type, operation, payload, self.clock.now());
        let id = self.store.enqueue(&item).await?;
        info!(item_id = %id, entity_id = %item.entity_id, "Write queued");

        if self.connectivity.is_online() {
            self.drain_signal.notify_one();
        }
        Ok(id)
    }

    pub async fn get_status(&self) -> QueueResult<StatusCounts> {
        let items = self.store.list(None).await?;
        Ok(StatusCounts::from_items(&items))
    }

    pub async fn get_item(&self, id: &str) -> QueueResult<QueueItem> {
        self.store.get(id).await?.ok_or_else(|| QueueError::ItemNotFound(id.to_string()))
    }

    /// Failed items with their recorded error
    pub async fn failed_items(&self) -> QueueResult<Vec<QueueItem>> {
        Ok(self.store.list(Some(&QueueFilter::status(ItemStatus::Failed))).await?)
    }

    /// Earliest backoff deadline among pending items
    pub async fn next_retry_at(&self) -> QueueResult<Option<DateTime<Utc>>> {
        let pending = self.store.list(Some(&QueueFilter::status(ItemStatus::Pending))).await?;
        Ok(pending.iter().filter_map(|item| item.next_attempt_at).min())
    }

    /// Re-queue a failed item with a fresh attempt budget
    #[instrument(skip(self))]
    pub async fn retry_failed(&self, id: &str) -> QueueResult<QueueItem> {
        self.checked_transition(id, ItemStatus::Pending).await?;

        let patch = QueueItemPatch::default()
            .with_status(ItemStatus::Pending)
            .with_attempt_count(0)
            .with_last_error(None)
            .with_next_attempt_at(None);
        let item = self.store.update(id, &patch).await?;
        info!(item_id = %id, "Failed item re-queued");

        if self.connectivity.is_online() {
            self.drain_signal.notify_one();
        }
        Ok(item)
    }

    /// Remove synced items, and failed ones when `include_failed` is set
    ///
    /// Pending and processing items are never removed.
    #[instrument(skip(self))]
    pub async fn clear(&self, include_failed: bool) -> QueueResult<usize> {
        let mut statuses = vec![ItemStatus::Synced];
        if include_failed {
            statuses.push(ItemStatus::Failed);
        }

        let mut removed = 0;
        for item in self.store.list(Some(&QueueFilter::statuses(statuses))).await? {
            if self.store.remove(&item.id).await? {
                removed += 1;
            }
        }
        info!(removed, include_failed, "Queue cleared");
        Ok(removed)
    }

    /// Return items left `processing` by a crash to `pending`
    ///
    /// Items that had already used every attempt are failed instead.
    #[instrument(skip(self))]
    pub async fn recover_interrupted(&self) -> QueueResult<usize> {
        let stuck = self.store.list(Some(&QueueFilter::status(ItemStatus::Processing))).await?;
        let mut recovered = 0;

        for item in stuck {
            let patch = if self.backoff.is_terminal(item.attempt_count) {
                QueueItemPatch::default()
                    .with_status(ItemStatus::Failed)
                    .with_last_error(Some(ItemError::transient("interrupted on final attempt")))
            } else {
                recovered += 1;
                QueueItemPatch::default().with_status(ItemStatus::Pending)
            };
            self.store.update(&item.id, &patch).await?;
            warn!(item_id = %item.id, attempt_count = item.attempt_count, "Recovered interrupted item");
        }

        Ok(recovered)
    }

    /// Run one drain pass
    #[instrument(skip(self, processor))]
    pub async fn process_queue(&self, processor: &dyn ItemProcessor) -> QueueResult<PassReport> {
        let Ok(_guard) = self.pass_guard.try_lock() else {
            debug!("Drain pass already running");
            return Ok(PassReport::AlreadyRunning);
        };

        let now = self.clock.now();
        let mut due: Vec<QueueItem> = self
            .store
            .list(Some(&QueueFilter::status(ItemStatus::Pending)))
            .await?
            .into_iter()
            .filter(|item| item.is_due(now))
            .collect();
        due.sort_by(|a, b| a.drain_key().cmp(&b.drain_key()));

        debug!(due = due.len(), "Starting drain pass");
        let mut summary = SyncSummary::default();

        for item in due {
            if !self.connectivity.is_online() {
                info!("Connectivity lost, stopping drain pass");
                summary.halted_offline = true;
                break;
            }

            let claimed = match self.claim(&item).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(item_id = %item.id, error = %e, "Failed to claim item");
                    summary.store_errors.push(format!("{}: {e}", item.id));
                    continue;
                }
            };

            let disposition = processor.process(&claimed).await;

            match self.apply(&claimed, disposition).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!(item_id = %claimed.id, error = %e, "Failed to record item outcome");
                    summary.store_errors.push(format!("{}: {e}", claimed.id));
                }
            }
        }

        info!(
            synced = summary.synced,
            failed = summary.failed,
            retrying = summary.retrying,
            conflicts_resolved = summary.conflicts_resolved,
            halted_offline = summary.halted_offline,
            "Drain pass finished"
        );
        Ok(PassReport::Completed(summary))
    }

    /// Stored item, if its current status may move to `next`
    async fn checked_transition(&self, id: &str, next: ItemStatus) -> QueueResult<QueueItem> {
        let current = self.get_item(id).await?;
        if !current.status.can_transition_to(next) {
            return Err(QueueError::invalid_transition(id, current.status, next));
        }
        Ok(current)
    }

    async fn claim(&self, item: &QueueItem) -> QueueResult<QueueItem> {
        self.checked_transition(&item.id, ItemStatus::Processing).await?;
        let patch = QueueItemPatch::default()
            .with_status(ItemStatus::Processing)
            .with_attempt_count(item.attempt_count.saturating_add(1))
            .with_last_attempt_at(Some(self.clock.now()))
            .with_next_attempt_at(None);
        Ok(self.store.update(&item.id, &patch).await?)
    }

    async fn apply(&self, item: &QueueItem, disposition: Disposition) -> QueueResult<SyncOutcome> {
        let (patch, outcome) = match disposition {
            Disposition::Synced { server_id, via_conflict } => {
                debug!(item_id = %item.id, server_id = %server_id, "Item synced");
                let patch = QueueItemPatch::default()
                    .with_status(ItemStatus::Synced)
                    .with_server_id(Some(server_id.clone()))
                    .with_last_error(None)
                    .with_next_attempt_at(None);
                let result =
                    if via_conflict { OutcomeKind::ConflictResolved } else { OutcomeKind::Success };
                (patch, outcome(item, result, Some(server_id), None))
            }
            Disposition::Retry { error, .. } if self.backoff.is_terminal(item.attempt_count) => {
                warn!(item_id = %item.id, attempts = item.attempt_count, error = %error, "Retries exhausted");
                (failed_patch(&error), outcome(item, OutcomeKind::TerminalError, None, Some(error)))
            }
            Disposition::Retry { error, .. } if !error.kind.is_retryable() => {
                warn!(item_id = %item.id, error = %error, "Error kind is not retryable");
                (failed_patch(&error), outcome(item, OutcomeKind::TerminalError, None, Some(error)))
            }
            Disposition::Retry { error, delay } => {
                let delay = delay.min(self.backoff.max_scheduled_delay());
                let next_attempt_at = deadline_after(self.clock.now(), delay);
                debug!(
                    item_id = %item.id,
                    attempt = item.attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Item scheduled for retry"
                );
                let patch = QueueItemPatch::default()
                    .with_status(ItemStatus::Pending)
                    .with_next_attempt_at(Some(next_attempt_at))
                    .with_last_error(Some(error.clone()));
                (patch, outcome(item, OutcomeKind::RetryableError, None, Some(error)))
            }
            Disposition::Failed { error } => {
                warn!(item_id = %item.id, error = %error, "Item failed");
                (failed_patch(&error), outcome(item, OutcomeKind::TerminalError, None, Some(error)))
            }
        };

        if let Some(next) = patch.status {
            self.checked_transition(&item.id, next).await?;
        }
        self.store.update(&item.id, &patch).await?;
        Ok(outcome)
    }
}

fn failed_patch(error: &ItemError) -> QueueItemPatch {
    QueueItemPatch::default()
        .with_status(ItemStatus::Failed)
        .with_last_error(Some(error.clone()))
        .with_next_attempt_at(None)
}

fn outcome(
    item: &QueueItem,
    result: OutcomeKind,
    server_id: Option<String>,
    error: Option<ItemError>,
) -> SyncOutcome {
    SyncOutcome { item_id: item.id.clone(), result, server_id, error }
}

fn deadline_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    chrono::Duration::try_milliseconds(millis)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
