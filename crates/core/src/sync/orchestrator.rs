//! Sync orchestrator.
//!
//! Submits each claimed item through the remote gateway and turns the typed
//! answer into a [`Disposition`] for the queue manager:
//!
//! | Answer | Disposition |
//! |---|---|
//! | success | synced, local record linked to the server id |
//! | validation error | failed immediately |
//! | transient error or timeout | retry with exponential backoff |
//! | rate limited | retry after `Retry-After`, else backoff |
//! | conflict | duplicate check, then last-write-wins |
//! | gateway failure | failed (fatal) |
//!
//! Conflicting report creations are first checked for duplicates. Otherwise
//! the later `modified_at` wins: a winning server copy replaces the local one,
//! a winning local copy is resubmitted once as an update of the server entity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use civicsync_domain::constants::DEFAULT_SUBMIT_TIMEOUT_SECS;
use civicsync_domain::{
    EntityRecord, EntityType, ItemError, Operation, QueueItem, SubmitResult, SyncConfig,
};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::conflict::{ConflictResolver, Resolution};
use crate::ports::{GatewayError, LocalRecordStore, RemoteApiGateway};
use crate::queue::{Disposition, ItemProcessor, PassReport, QueueManager, QueueResult};

/// Drives drain passes against the remote backend
pub struct SyncOrchestrator {
    manager: Arc<QueueManager>,
    gateway: Arc<dyn RemoteApiGateway>,
    local_store: Arc<dyn LocalRecordStore>,
    resolver: ConflictResolver,
    submit_timeout: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        manager: Arc<QueueManager>,
        gateway: Arc<dyn RemoteApiGateway>,
        local_store: Arc<dyn LocalRecordStore>,
    ) -> Self {
        Self {
            manager,
            gateway,
            local_store,
            resolver: ConflictResolver::default(),
            submit_timeout: Duration::from_secs(DEFAULT_SUBMIT_TIMEOUT_SECS),
        }
    }

    /// Orchestrator with the submission timeout taken from configuration
    pub fn from_config(
        manager: Arc<QueueManager>,
        gateway: Arc<dyn RemoteApiGateway>,
        local_store: Arc<dyn LocalRecordStore>,
        config: &SyncConfig,
    ) -> Self {
        Self::new(manager, gateway, local_store)
            .with_submit_timeout(Duration::from_secs(config.submit_timeout_seconds.max(1)))
    }

    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn submit_timeout(&self) -> Duration {
        self.submit_timeout
    }

    pub fn manager(&self) -> &Arc<QueueManager> {
        &self.manager
    }

    /// Run one drain pass through the queue manager
    #[instrument(skip(self))]
    pub async fn drain(&self) -> QueueResult<PassReport> {
        self.manager.process_queue(self).await
    }

    /// Gateway call bounded by the per-item timeout; a timeout is transient
    async fn submit(
        &self,
        entity_type: EntityType,
        operation: Operation,
        payload: &Value,
    ) -> Result<SubmitResult, GatewayError> {
        match tokio::time::timeout(
            self.submit_timeout,
            self.gateway.submit(entity_type, operation, payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Ok(SubmitResult::TransientError {
                message: format!("submission timed out after {:?}", self.submit_timeout),
            }),
        }
    }

    /// Everything except conflicts, which callers handle themselves
    async fn classify(
        &self,
        item: &QueueItem,
        result: Result<SubmitResult, GatewayError>,
        via_conflict: bool,
    ) -> Disposition {
        match result {
            Ok(SubmitResult::Success { server_id }) => {
                self.complete(item, server_id, via_conflict).await
            }
            Ok(SubmitResult::ValidationError { message }) => {
                Disposition::Failed { error: ItemError::validation(message) }
            }
            Ok(SubmitResult::TransientError { message }) => Disposition::Retry {
                error: ItemError::transient(message),
                delay: self.backoff_delay(item),
            },
            Ok(SubmitResult::RateLimited { retry_after_seconds }) => {
                let delay = retry_after_seconds
                    .map(|seconds| self.manager.backoff().retry_after_delay(seconds))
                    .unwrap_or_else(|| self.backoff_delay(item));
                Disposition::Retry {
                    error: ItemError::rate_limited(format!(
                        "rate limited, retry in {}s",
                        delay.as_secs()
                    )),
                    delay,
                }
            }
            Ok(SubmitResult::Conflict { existing_entity }) => Disposition::Retry {
                error: ItemError::conflict(format!(
                    "conflict with server entity {} persisted after resubmission",
                    existing_entity.id
                )),
                delay: self.backoff_delay(item),
            },
            Err(e) => Disposition::Failed { error: ItemError::fatal(e.to_string()) },
        }
    }

    /// Delay before the retry following the current attempt
    ///
    /// `attempt_count` already includes the attempt that just failed, so the
    /// n-th failure waits `next_delay(n - 1)`: 1s after the first, 2s after
    /// the second, and so on. With the default five attempts the last delay
    /// used is 8s; `next_delay(4)` only appears in [`BackoffPolicy::schedule`].
    ///
    /// [`BackoffPolicy::schedule`]: crate::retry::BackoffPolicy::schedule
    fn backoff_delay(&self, item: &QueueItem) -> Duration {
        self.manager.backoff().next_delay(item.attempt_count.saturating_sub(1))
    }

    async fn complete(&self, item: &QueueItem, server_id: String, via_conflict: bool) -> Disposition {
        if let Err(e) = self.local_store.mark_synced(&item.entity_id, &server_id).await {
            warn!(item_id = %item.id, error = %e, "Failed to link local record to server id");
        }
        Disposition::Synced { server_id, via_conflict }
    }

    #[instrument(skip(self, item, server), fields(item_id = %item.id, server_id = %server.id))]
    async fn reconcile(&self, item: &QueueItem, server: EntityRecord) -> Disposition {
        if server.id.is_empty() {
            return Disposition::Failed {
                error: ItemError::fatal("conflict response did not identify the server entity"),
            };
        }

        let local = EntityRecord::from_item(item);

        if item.entity_type == EntityType::Report && item.operation == Operation::Create {
            let mut candidates = vec![server.clone()];
            match self.local_store.find_candidate_duplicates(&local).await {
                Ok(found) => candidates.extend(found),
                Err(e) => warn!(error = %e, "Duplicate candidate lookup failed"),
            }

            if let Some(duplicate) = self.resolver.find_duplicate(&local, &candidates) {
                info!(
                    existing_id = %duplicate.existing.id,
                    score = duplicate.score,
                    "Report is a duplicate of an existing report"
                );
                return self.complete(item, duplicate.existing.id, true).await;
            }
        }

        match self.resolver.resolve_last_write_wins(&local, &server) {
            Resolution::ServerWins => {
                debug!("Server copy is newer");
                if let Err(e) = self.local_store.upsert(&server).await {
                    warn!(error = %e, "Failed to store server copy locally");
                }
                self.complete(item, server.id, true).await
            }
            Resolution::LocalWins => {
                debug!("Local copy is newer, resubmitting");
                let operation = match item.operation {
                    Operation::Delete => Operation::Delete,
                    Operation::Create | Operation::Update => Operation::Update,
                };
                let payload = with_server_id(&item.payload, &server.id);
                let result = self.submit(item.entity_type, operation, &payload).await;
                self.classify(item, result, true).await
            }
        }
    }
}

#[async_trait]
impl ItemProcessor for SyncOrchestrator {
    async fn process(&self, item: &QueueItem) -> Disposition {
        debug!(
            item_id = %item.id,
            entity_type = %item.entity_type,
            operation = %item.operation,
            attempt = item.attempt_count,
            "Submitting item"
        );

        match self.submit(item.entity_type, item.operation, &item.payload).await {
            Ok(SubmitResult::Conflict { existing_entity }) => {
                self.reconcile(item, existing_entity).await
            }
            result => self.classify(item, result, false).await,
        }
    }
}

/// Local payload retargeted at the server entity
fn with_server_id(payload: &Value, server_id: &str) -> Value {
    let mut payload = payload.clone();
    if let Value::Object(map) = &mut payload {
        map.insert("id".to_string(), Value::String(server_id.to_string()));
    }
    payload
}
