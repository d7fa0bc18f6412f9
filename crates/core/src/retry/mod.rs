//! Retry scheduling

pub mod backoff;

pub use backoff::BackoffPolicy;
