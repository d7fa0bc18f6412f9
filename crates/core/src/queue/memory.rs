//! Non-durable queue store
//!
//! Keeps items in memory only. Suitable for tests and for ephemeral sessions
//! where losing queued writes on exit is acceptable.

use std::collections::HashMap;

use async_trait::async_trait;
use civicsync_domain::{CivicSyncError, QueueFilter, QueueItem, QueueItemPatch, Result};
use parking_lot::RwLock;

use crate::ports::QueueStore;

/// In-memory [`QueueStore`]
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    items: RwLock<HashMap<String, QueueItem>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, item: &QueueItem) -> Result<String> {
        self.items.write().entry(item.id.clone()).or_insert_with(|| item.clone());
        Ok(item.id.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<QueueItem>> {
        Ok(self.items.read().get(id).cloned())
    }

    async fn update(&self, id: &str, patch: &QueueItemPatch) -> Result<QueueItem> {
        let mut items = self.items.write();
        let item = items
            .get_mut(id)
            .ok_or_else(|| CivicSyncError::NotFound(format!("queue item {id}")))?;
        item.apply(patch);
        Ok(item.clone())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.items.write().remove(id).is_some())
    }

    async fn list(&self, filter: Option<&QueueFilter>) -> Result<Vec<QueueItem>> {
        let mut items: Vec<QueueItem> = self
            .items
            .read()
            .values()
            .filter(|item| filter.map_or(true, |f| f.matches(item)))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }
}
