//! Background drain scheduling
//!
//! The scheduler follows the same runtime rules as every background worker:
//! - Explicit lifecycle management (start/stop)
//! - Join handles for spawned tasks
//! - Cancellation token support
//! - Timeout on shutdown
//! - Structured tracing and metrics per pass

pub mod error;
pub mod sync_scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use sync_scheduler::{SyncScheduler, SyncSchedulerConfig};
