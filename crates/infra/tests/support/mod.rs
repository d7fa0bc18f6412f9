//! Shared fixtures for infra integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civicsync_core::{Clock, LocalRecordStore};
use civicsync_domain::{EntityRecord, Result};
use parking_lot::Mutex;

/// Local record store that remembers which records were linked to a server id.
#[derive(Default)]
pub struct RecordingLocalStore {
    synced: Mutex<HashMap<String, String>>,
}

impl RecordingLocalStore {
    pub fn server_id_for(&self, local_id: &str) -> Option<String> {
        self.synced.lock().get(local_id).cloned()
    }
}

#[async_trait]
impl LocalRecordStore for RecordingLocalStore {
    async fn upsert(&self, _record: &EntityRecord) -> Result<()> {
        Ok(())
    }

    async fn mark_synced(&self, local_id: &str, server_id: &str) -> Result<()> {
        self.synced.lock().insert(local_id.to_string(), server_id.to_string());
        Ok(())
    }

    async fn find_candidate_duplicates(&self, _record: &EntityRecord) -> Result<Vec<EntityRecord>> {
        Ok(Vec::new())
    }
}

/// Clock that follows tokio's (pausable) time.
pub struct TokioClock {
    base: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { base: Utc::now(), start: tokio::time::Instant::now() })
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed()).unwrap_or(chrono::Duration::zero());
        self.base + elapsed
    }
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}
