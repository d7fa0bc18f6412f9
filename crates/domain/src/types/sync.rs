//! Submission results and drain pass outcomes

use serde::{Deserialize, Serialize};

use crate::types::queue::ItemError;
use crate::types::record::EntityRecord;

/// Typed result of a single backend submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitResult {
    Success { server_id: String },
    ValidationError { message: String },
    TransientError { message: String },
    RateLimited { retry_after_seconds: Option<u64> },
    Conflict { existing_entity: EntityRecord },
}

/// Per-item result of a drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    RetryableError,
    TerminalError,
    ConflictResolved,
}

/// What happened to one item during a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub item_id: String,
    pub result: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

/// Aggregate of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub synced: usize,
    pub failed: usize,
    pub retrying: usize,
    pub conflicts_resolved: usize,
    pub outcomes: Vec<SyncOutcome>,
    /// The pass stopped early because connectivity dropped
    pub halted_offline: bool,
    /// Store failures while applying an outcome; the pass continued past them
    pub store_errors: Vec<String>,
}

impl SyncSummary {
    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome.result {
            OutcomeKind::Success => self.synced += 1,
            OutcomeKind::ConflictResolved => {
                self.synced += 1;
                self.conflicts_resolved += 1;
            }
            OutcomeKind::RetryableError => self.retrying += 1,
            OutcomeKind::TerminalError => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }
}
