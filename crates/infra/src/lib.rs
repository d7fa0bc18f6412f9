//! # CivicSync Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - Queue stores (SQLite via r2d2, JSON document on disk)
//! - HTTP gateway for the civic backend
//! - Sync scheduler driving drain passes
//! - Configuration loading, tracing setup and sync metrics
//!
//! ## Architecture
//! - Implements traits defined in `civicsync-core`
//! - Depends on `civicsync-domain` and `civicsync-core`
//! - Contains all "impure" code (I/O, network, timers)

pub mod config;
pub mod database;
pub mod errors;
pub mod http;
pub mod observability;
pub mod scheduling;
pub mod storage;

// Re-export commonly used items
pub use database::{DbManager, SqliteQueueStore};
pub use errors::InfraError;
pub use http::{HttpApiGateway, HttpApiGatewayBuilder};
pub use observability::{init_tracing, SyncMetrics, SyncMetricsSnapshot};
pub use scheduling::{SyncScheduler, SyncSchedulerConfig};
pub use storage::FileQueueStore;
