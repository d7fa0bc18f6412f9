//! File-backed storage

pub mod file_queue;

pub use file_queue::FileQueueStore;
