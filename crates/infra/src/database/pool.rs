//! SQLite connection pool helpers
//!
//! Builds the r2d2 pool used by [`super::DbManager`] and applies the
//! per-connection pragmas the queue relies on for crash safety.

use std::path::Path;
use std::time::Duration;

use civicsync_domain::{CivicSyncError, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{instrument, warn};

use crate::errors::InfraError;

/// Pool of SQLite connections
pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Connection checked out of a [`SqlitePool`]
pub type SqliteConnection = PooledConnection<SqliteConnectionManager>;

/// Pool tuning
#[derive(Debug, Clone)]
pub struct SqlitePoolConfig {
    pub max_size: u32,
    pub connection_timeout: Duration,
    pub busy_timeout: Duration,
}

impl Default for SqlitePoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            connection_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Create a pool for the database file at `path`
///
/// Every connection runs in WAL mode with `synchronous=FULL` so that a
/// committed queue write survives process termination.
#[instrument(skip_all, fields(db_path = ?path.as_ref(), pool_size = config.max_size))]
pub fn create_sqlite_pool<P: AsRef<Path>>(
    path: P,
    config: SqlitePoolConfig,
) -> Result<SqlitePool> {
    let busy_timeout = config.busy_timeout;
    let manager = SqliteConnectionManager::file(path.as_ref())
        .with_init(move |conn| apply_connection_pragmas(conn, busy_timeout));

    Pool::builder()
        .max_size(config.max_size.max(1))
        .connection_timeout(config.connection_timeout)
        .build(manager)
        .map_err(|err| {
            warn!(error = %err, "failed to create sqlite pool");
            CivicSyncError::from(InfraError::from(err))
        })
}

fn apply_connection_pragmas(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA wal_autocheckpoint=1000;
         PRAGMA synchronous=FULL;
         PRAGMA foreign_keys=ON;",
    )?;
    conn.busy_timeout(busy_timeout)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn pool_connections_use_wal() {
        let temp_dir = TempDir::new().unwrap();
        let pool =
            create_sqlite_pool(temp_dir.path().join("pool.db"), SqlitePoolConfig::default())
                .expect("pool should be created");

        let conn = pool.get().expect("connection should be acquired");
        let journal_mode: String =
            conn.pragma_query_value(None, "journal_mode", |row| row.get(0)).unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");

        let synchronous: i64 =
            conn.pragma_query_value(None, "synchronous", |row| row.get(0)).unwrap();
        assert_eq!(synchronous, 2);
    }
}
