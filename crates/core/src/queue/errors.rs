//! Error types for queue management

use civicsync_domain::{CivicSyncError, ItemStatus};
use thiserror::Error;

/// Queue manager errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue store error: {0}")]
    Store(#[from] CivicSyncError),

    #[error("Queue item not found: {0}")]
    ItemNotFound(String),

    #[error("Invalid status transition for item {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: ItemStatus, to: ItemStatus },
}

impl QueueError {
    pub fn invalid_transition(id: impl Into<String>, from: ItemStatus, to: ItemStatus) -> Self {
        Self::InvalidTransition { id: id.into(), from, to }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_error_names_both_states() {
        let err = QueueError::invalid_transition("item-1", ItemStatus::Synced, ItemStatus::Pending);
        assert_eq!(
            err.to_string(),
            "Invalid status transition for item item-1: synced -> pending"
        );
    }

    #[test]
    fn store_errors_convert() {
        let err: QueueError = CivicSyncError::Database("disk full".into()).into();
        assert!(matches!(err, QueueError::Store(_)));
    }
}
