//! Domain types and models
//!
//! Queue items and their lifecycle, connectivity readings, drain outcomes and
//! the entity records the conflict resolver compares.

pub mod connectivity;
pub mod queue;
pub mod record;
pub mod sync;

pub use connectivity::{ConnectionKind, ConnectivityState};
pub use queue::{
    EntityType, ErrorKind, ItemError, ItemStatus, Operation, QueueFilter, QueueItem,
    QueueItemPatch, StatusCounts,
};
pub use record::{EntityRecord, GeoPoint, ReportFields};
pub use sync::{OutcomeKind, SubmitResult, SyncOutcome, SyncSummary};
