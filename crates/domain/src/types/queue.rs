//! Queue item model
//!
//! A [`QueueItem`] is one pending write against the backend. Items move
//! through `pending -> processing -> synced | failed | pending` and only the
//! queue manager changes their status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::MAX_ERROR_MESSAGE_LENGTH;
use crate::impl_domain_status_conversions;

/// Kind of entity a queued write targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Report,
    Task,
    Media,
}

impl EntityType {
    /// Drain priority: reports go before tasks, tasks before media
    pub fn drain_rank(&self) -> u8 {
        match self {
            Self::Report => 0,
            Self::Task => 1,
            Self::Media => 2,
        }
    }

    /// REST collection name
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Report => "reports",
            Self::Task => "tasks",
            Self::Media => "media",
        }
    }
}

impl_domain_status_conversions!(EntityType {
    Report => "report",
    Task => "task",
    Media => "media",
});

/// Write operation carried by a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl_domain_status_conversions!(Operation {
    Create => "create",
    Update => "update",
    Delete => "delete",
});

/// Lifecycle status of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Synced,
    Failed,
}

impl ItemStatus {
    /// `synced` and `failed` items are never claimed again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Synced | Self::Failed)
    }

    /// Whether the queue manager may move an item from `self` to `next`
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Pending)
                | (Self::Processing, Self::Synced)
                | (Self::Processing, Self::Failed)
                | (Self::Failed, Self::Pending)
        )
    }
}

impl_domain_status_conversions!(ItemStatus {
    Pending => "pending",
    Processing => "processing",
    Synced => "synced",
    Failed => "failed",
});

/// Category of the last error recorded on an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transient,
    RateLimited,
    Conflict,
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited | Self::Conflict)
    }
}

impl_domain_status_conversions!(ErrorKind {
    Validation => "validation",
    Transient => "transient",
    RateLimited => "rate_limited",
    Conflict => "conflict",
    Fatal => "fatal",
});

/// Error recorded on a queue item after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemError {
    /// Builds an error, truncating the message to a storable length
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message: String = message.into();
        let message = if message.chars().count() > MAX_ERROR_MESSAGE_LENGTH {
            message.chars().take(MAX_ERROR_MESSAGE_LENGTH).collect()
        } else {
            message
        };
        Self { kind, message }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A durable pending write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub entity_type: EntityType,
    pub operation: Operation,
    /// Local identifier of the written entity
    pub entity_id: String,
    pub payload: Value,
    pub status: ItemStatus,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Earliest time the item may be claimed again
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<ItemError>,
    pub server_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    /// Creates a new pending item with a time-ordered id
    pub fn new(
        entity_type: EntityType,
        operation: Operation,
        payload: Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::now_v7().to_string();
        let entity_id = payload
            .get("localId")
            .or_else(|| payload.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| id.clone());

        Self {
            id,
            entity_type,
            operation,
            entity_id,
            payload,
            status: ItemStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            next_attempt_at: None,
            last_error: None,
            server_id: None,
            created_at,
        }
    }

    /// Pending and past its backoff deadline
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ItemStatus::Pending && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Sort key for a drain pass: entity priority, then FIFO
    pub fn drain_key(&self) -> (u8, DateTime<Utc>, &str) {
        (self.entity_type.drain_rank(), self.created_at, self.id.as_str())
    }

    /// Applies a partial update in place
    pub fn apply(&mut self, patch: &QueueItemPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(attempt_count) = patch.attempt_count {
            self.attempt_count = attempt_count;
        }
        if let Some(last_attempt_at) = patch.last_attempt_at {
            self.last_attempt_at = last_attempt_at;
        }
        if let Some(next_attempt_at) = patch.next_attempt_at {
            self.next_attempt_at = next_attempt_at;
        }
        if let Some(last_error) = &patch.last_error {
            self.last_error = last_error.clone();
        }
        if let Some(server_id) = &patch.server_id {
            self.server_id = server_id.clone();
        }
    }
}

/// Partial update of a queue item
///
/// `None` leaves a field untouched; `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueItemPatch {
    pub status: Option<ItemStatus>,
    pub attempt_count: Option<u32>,
    pub last_attempt_at: Option<Option<DateTime<Utc>>>,
    pub next_attempt_at: Option<Option<DateTime<Utc>>>,
    pub last_error: Option<Option<ItemError>>,
    pub server_id: Option<Option<String>>,
}

impl QueueItemPatch {
    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_attempt_count(mut self, attempt_count: u32) -> Self {
        self.attempt_count = Some(attempt_count);
        self
    }

    pub fn with_last_attempt_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_attempt_at = Some(at);
        self
    }

    pub fn with_next_attempt_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.next_attempt_at = Some(at);
        self
    }

    pub fn with_last_error(mut self, error: Option<ItemError>) -> Self {
        self.last_error = Some(error);
        self
    }

    pub fn with_server_id(mut self, server_id: Option<String>) -> Self {
        self.server_id = Some(server_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Selection used by `QueueStore::list`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilter {
    /// Empty means any status
    pub statuses: Vec<ItemStatus>,
    pub entity_type: Option<EntityType>,
}

impl QueueFilter {
    pub fn status(status: ItemStatus) -> Self {
        Self { statuses: vec![status], entity_type: None }
    }

    pub fn statuses(statuses: impl IntoIterator<Item = ItemStatus>) -> Self {
        Self { statuses: statuses.into_iter().collect(), entity_type: None }
    }

    pub fn with_entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    pub fn matches(&self, item: &QueueItem) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&item.status))
            && self.entity_type.map_or(true, |t| t == item.entity_type)
    }
}

/// Number of items per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub synced: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a QueueItem>) -> Self {
        let mut counts = Self::default();
        for item in items {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Processing => counts.processing += 1,
                ItemStatus::Synced => counts.synced += 1,
                ItemStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.synced + self.failed
    }
}
