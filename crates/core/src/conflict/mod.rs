//! Conflict resolution between local writes and server state

pub mod resolver;
pub mod similarity;

pub use resolver::{ConflictResolver, DuplicateMatch, Resolution};
