//! # CivicSync Core
//!
//! Offline submission logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (queue store, remote gateway, local records, clock)
//! - Connectivity monitor with debounced reachability
//! - Retry/backoff policy and conflict resolution
//! - Queue manager and sync orchestrator
//!
//! ## Architecture Principles
//! - Only depends on `civicsync-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod clock;
pub mod conflict;
pub mod connectivity;
pub mod ports;
pub mod queue;
pub mod retry;
pub mod sync;

// Re-export specific items to avoid ambiguity
pub use clock::{Clock, MockClock, SystemClock};
pub use conflict::{ConflictResolver, DuplicateMatch, Resolution};
pub use connectivity::{ConnectivityListener, ConnectivityMonitor, Subscription};
pub use ports::{
    ConnectivityProbe, GatewayError, LocalRecordStore, QueueStore, RemoteApiGateway,
};
pub use queue::{
    Disposition, InMemoryQueueStore, ItemProcessor, PassReport, QueueError, QueueManager,
    QueueResult,
};
pub use retry::BackoffPolicy;
pub use sync::SyncOrchestrator;
