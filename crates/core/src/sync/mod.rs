//! Drain orchestration

pub mod orchestrator;

pub use orchestrator::SyncOrchestrator;
