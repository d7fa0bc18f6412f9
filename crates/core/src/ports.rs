//! Port interfaces for the submission engine
//!
//! Storage, the remote backend and the local record cache are reached only
//! through these traits; adapters live in `civicsync-infra`.

use async_trait::async_trait;
use civicsync_domain::{
    EntityRecord, EntityType, Operation, QueueFilter, QueueItem, QueueItemPatch, Result,
    SubmitResult,
};
use serde_json::Value;
use thiserror::Error;

/// Durable storage for queue items
///
/// Every write must be atomic with respect to process termination.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new item; enqueueing an id that already exists is a no-op
    async fn enqueue(&self, item: &QueueItem) -> Result<String>;

    /// Fetch a single item
    async fn get(&self, id: &str) -> Result<Option<QueueItem>>;

    /// Apply a partial update and return the stored item
    ///
    /// Fails with `CivicSyncError::NotFound` when the id is unknown.
    async fn update(&self, id: &str, patch: &QueueItemPatch) -> Result<QueueItem>;

    /// Delete an item, returning whether it existed
    async fn remove(&self, id: &str) -> Result<bool>;

    /// List items matching the filter, oldest first
    async fn list(&self, filter: Option<&QueueFilter>) -> Result<Vec<QueueItem>>;
}

/// Failure outside the typed submission results
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected response (status {status}): {message}")]
    UnexpectedResponse { status: u16, message: String },

    #[error("gateway failure: {0}")]
    Other(String),
}

/// Remote backend submission
#[async_trait]
pub trait RemoteApiGateway: Send + Sync {
    /// Submit one write and classify the backend's answer
    async fn submit(
        &self,
        entity_type: EntityType,
        operation: Operation,
        payload: &Value,
    ) -> std::result::Result<SubmitResult, GatewayError>;
}

/// Local copy of entities shown by the client
#[async_trait]
pub trait LocalRecordStore: Send + Sync {
    /// Replace the local copy with `record`
    async fn upsert(&self, record: &EntityRecord) -> Result<()>;

    /// Link a local entity to its server identifier
    async fn mark_synced(&self, local_id: &str, server_id: &str) -> Result<()>;

    /// Known records that might describe the same issue as `record`
    async fn find_candidate_duplicates(&self, record: &EntityRecord) -> Result<Vec<EntityRecord>>;
}

/// Current device reachability
pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self) -> bool;
}
