//! # CivicSync Domain
//!
//! Data types shared by the offline submission engine.
//!
//! This crate contains:
//! - Queue item, connectivity and sync outcome types
//! - Domain error type and Result definition
//! - Configuration structures
//! - Engine constants (backoff defaults, duplicate scoring weights)
//!
//! ## Architecture
//! - No dependencies on other CivicSync crates
//! - Only external dependencies allowed
//! - Pure data structures, no I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
