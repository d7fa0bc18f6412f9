//! Database implementations

pub mod manager;
pub mod pool;
pub mod queue_repository;

pub use manager::DbManager;
pub use pool::{create_sqlite_pool, SqliteConnection, SqlitePool, SqlitePoolConfig};
pub use queue_repository::SqliteQueueStore;
