//! SQLite-backed implementation of the queue store port.
//!
//! One row per queue item. Enqueue uses `INSERT OR IGNORE` so replaying an
//! enqueue after a restart never duplicates an item, and every update runs
//! inside its own transaction so a partially applied patch is never visible.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use civicsync_core::ports::QueueStore;
use civicsync_domain::{
    CivicSyncError, EntityType, ErrorKind, ItemError, ItemStatus, Operation, QueueFilter,
    QueueItem, QueueItemPatch, Result as DomainResult,
};
use rusqlite::{params, params_from_iter, OptionalExtension, Row, Transaction, TransactionBehavior};
use tokio::task;
use tracing::{debug, warn};

use super::manager::{map_sql_error, DbManager};

/// SQLite [`QueueStore`]
pub struct SqliteQueueStore {
    db: Arc<DbManager>,
}

impl SqliteQueueStore {
    /// Construct a store backed by the shared manager.
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    fn insert_item(conn: &rusqlite::Connection, item: &QueueItem) -> DomainResult<bool> {
        let payload_json = serde_json::to_string(&item.payload)?;
        let (error_kind, error_message) = split_error(item.last_error.as_ref());

        let inserted = conn
            .execute(
                QUEUE_INSERT_SQL,
                params![
                    item.id,
                    item.entity_type.to_string(),
                    item.operation.to_string(),
                    item.entity_id,
                    payload_json,
                    item.status.to_string(),
                    item.attempt_count,
                    item.last_attempt_at.map(format_timestamp),
                    item.next_attempt_at.map(format_timestamp),
                    error_kind,
                    error_message,
                    item.server_id,
                    format_timestamp(item.created_at),
                ],
            )
            .map_err(map_sql_error)?;

        Ok(inserted > 0)
    }

    fn fetch_one(conn: &rusqlite::Connection, id: &str) -> DomainResult<Option<QueueItem>> {
        conn.query_row(QUEUE_SELECT_BY_ID_SQL, params![id], map_queue_row)
            .optional()
            .map_err(map_sql_error)?
            .map(QueueRow::into_item)
            .transpose()
    }

    fn update_item(tx: &Transaction<'_>, id: &str, patch: &QueueItemPatch) -> DomainResult<QueueItem> {
        let mut item = Self::fetch_one(tx, id)?
            .ok_or_else(|| CivicSyncError::NotFound(format!("queue item {id}")))?;
        item.apply(patch);

        let (error_kind, error_message) = split_error(item.last_error.as_ref());
        tx.execute(
            QUEUE_UPDATE_SQL,
            params![
                item.id,
                item.status.to_string(),
                item.attempt_count,
                item.last_attempt_at.map(format_timestamp),
                item.next_attempt_at.map(format_timestamp),
                error_kind,
                error_message,
                item.server_id,
            ],
        )
        .map_err(map_sql_error)?;

        Ok(item)
    }

    fn fetch_filtered(
        conn: &rusqlite::Connection,
        filter: Option<&QueueFilter>,
    ) -> DomainResult<Vec<QueueItem>> {
        let mut sql = String::from(QUEUE_SELECT_SQL);
        let mut values: Vec<String> = Vec::new();
        let mut clauses: Vec<String> = Vec::new();

        if let Some(filter) = filter {
            if !filter.statuses.is_empty() {
                let placeholders = vec!["?"; filter.statuses.len()].join(", ");
                clauses.push(format!("status IN ({placeholders})"));
                values.extend(filter.statuses.iter().map(ToString::to_string));
            }
            if let Some(entity_type) = filter.entity_type {
                clauses.push("entity_type = ?".to_string());
                values.push(entity_type.to_string());
            }
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), map_queue_row)
            .map_err(map_sql_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sql_error)?;

        // One undecodable row must not hide the rest of the queue
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                match row.into_item() {
                    Ok(item) => Some(item),
                    Err(err) => {
                        warn!(item_id = %id, error = %err, "skipping unreadable queue row");
                        None
                    }
                }
            })
            .collect())
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn enqueue(&self, item: &QueueItem) -> DomainResult<String> {
        let db = Arc::clone(&self.db);
        let to_insert = item.clone();

        task::spawn_blocking(move || -> DomainResult<String> {
            let conn = db.get_connection()?;
            if !Self::insert_item(&conn, &to_insert)? {
                debug!(item_id = %to_insert.id, "queue item already stored");
            }
            Ok(to_insert.id)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get(&self, id: &str) -> DomainResult<Option<QueueItem>> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<QueueItem>> {
            let conn = db.get_connection()?;
            Self::fetch_one(&conn, &id)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn update(&self, id: &str, patch: &QueueItemPatch) -> DomainResult<QueueItem> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        let patch = patch.clone();

        task::spawn_blocking(move || -> DomainResult<QueueItem> {
            let mut conn = db.get_connection()?;
            // Read-then-write: take the write lock before the read
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sql_error)?;
            let item = Self::update_item(&tx, &id, &patch)?;
            tx.commit().map_err(map_sql_error)?;
            Ok(item)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn remove(&self, id: &str) -> DomainResult<bool> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();

        task::spawn_blocking(move || -> DomainResult<bool> {
            let conn = db.get_connection()?;
            let removed = conn.execute(QUEUE_DELETE_SQL, params![id]).map_err(map_sql_error)?;
            Ok(removed > 0)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(&self, filter: Option<&QueueFilter>) -> DomainResult<Vec<QueueItem>> {
        let db = Arc::clone(&self.db);
        let filter = filter.cloned();

        task::spawn_blocking(move || -> DomainResult<Vec<QueueItem>> {
            let conn = db.get_connection()?;
            Self::fetch_filtered(&conn, filter.as_ref())
        })
        .await
        .map_err(map_join_error)?
    }
}

const QUEUE_INSERT_SQL: &str = "INSERT OR IGNORE INTO queue_items (
        id, entity_type, operation, entity_id, payload_json, status, attempt_count,
        last_attempt_at, next_attempt_at, last_error_kind, last_error_message, server_id,
        created_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const QUEUE_UPDATE_SQL: &str = "UPDATE queue_items SET
        status = ?2, attempt_count = ?3, last_attempt_at = ?4, next_attempt_at = ?5,
        last_error_kind = ?6, last_error_message = ?7, server_id = ?8
    WHERE id = ?1";

const QUEUE_DELETE_SQL: &str = "DELETE FROM queue_items WHERE id = ?1";

const QUEUE_SELECT_SQL: &str = "SELECT
        id, entity_type, operation, entity_id, payload_json, status, attempt_count,
        last_attempt_at, next_attempt_at, last_error_kind, last_error_message, server_id,
        created_at
    FROM queue_items";

const QUEUE_SELECT_BY_ID_SQL: &str = "SELECT
        id, entity_type, operation, entity_id, payload_json, status, attempt_count,
        last_attempt_at, next_attempt_at, last_error_kind, last_error_message, server_id,
        created_at
    FROM queue_items
    WHERE id = ?1";

/// Column values as stored, before domain decoding
struct QueueRow {
    id: String,
    entity_type: String,
    operation: String,
    entity_id: String,
    payload_json: String,
    status: String,
    attempt_count: u32,
    last_attempt_at: Option<String>,
    next_attempt_at: Option<String>,
    error_kind: Option<String>,
    error_message: Option<String>,
    server_id: Option<String>,
    created_at: String,
}

impl QueueRow {
    fn into_item(self) -> DomainResult<QueueItem> {
        let last_error = self.error_kind.map(|kind| {
            let kind = ErrorKind::from_str(&kind).unwrap_or(ErrorKind::Fatal);
            ItemError::new(kind, self.error_message.unwrap_or_default())
        });

        Ok(QueueItem {
            entity_type: parse_column::<EntityType>(&self.id, "entity_type", &self.entity_type)?,
            operation: parse_column::<Operation>(&self.id, "operation", &self.operation)?,
            entity_id: self.entity_id,
            payload: serde_json::from_str(&self.payload_json)?,
            status: parse_status(&self.id, &self.status),
            attempt_count: self.attempt_count,
            last_attempt_at: self.last_attempt_at.as_deref().map(parse_timestamp).transpose()?,
            next_attempt_at: self.next_attempt_at.as_deref().map(parse_timestamp).transpose()?,
            last_error,
            server_id: self.server_id,
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
        })
    }
}

fn map_queue_row(row: &Row<'_>) -> rusqlite::Result<QueueRow> {
    Ok(QueueRow {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        operation: row.get(2)?,
        entity_id: row.get(3)?,
        payload_json: row.get(4)?,
        status: row.get(5)?,
        attempt_count: row.get(6)?,
        last_attempt_at: row.get(7)?,
        next_attempt_at: row.get(8)?,
        error_kind: row.get(9)?,
        error_message: row.get(10)?,
        server_id: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn parse_column<T: FromStr<Err = String>>(id: &str, column: &str, raw: &str) -> DomainResult<T> {
    raw.parse::<T>().map_err(|err| {
        CivicSyncError::Database(format!("queue item {id} has invalid {column}: {err}"))
    })
}

fn parse_status(id: &str, raw: &str) -> ItemStatus {
    match raw.parse::<ItemStatus>() {
        Ok(status) => status,
        Err(err) => {
            warn!(
                item_id = %id,
                raw_status = %raw,
                error = %err,
                "invalid queue status returned by sqlite, defaulting to pending"
            );
            ItemStatus::Pending
        }
    }
}

fn split_error(error: Option<&ItemError>) -> (Option<String>, Option<String>) {
    match error {
        Some(error) => (Some(error.kind.to_string()), Some(error.message.clone())),
        None => (None, None),
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| CivicSyncError::Database(format!("invalid timestamp {raw:?}: {err}")))
}

fn map_join_error(err: task::JoinError) -> CivicSyncError {
    if err.is_cancelled() {
        CivicSyncError::Internal("queue store task cancelled".into())
    } else {
        CivicSyncError::Internal(format!("queue store task panic: {err}"))
    }
}
