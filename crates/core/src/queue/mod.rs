//! Submission queue management

pub mod errors;
pub mod manager;
pub mod memory;

pub use errors::{QueueError, QueueResult};
pub use manager::{Disposition, ItemProcessor, PassReport, QueueManager};
pub use memory::InMemoryQueueStore;
