//! JSON document queue store.
//!
//! The whole queue lives in a single versioned JSON document. Every mutation
//! rewrites the document to a sibling temp file, fsyncs it and renames it over
//! the original, so a reader after a crash sees either the old or the new
//! queue and never a torn one. The in-memory copy is only replaced once the
//! write has succeeded.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use civicsync_core::ports::QueueStore;
use civicsync_domain::{
    CivicSyncError, QueueFilter, QueueItem, QueueItemPatch, Result as DomainResult,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, info, instrument};

use crate::errors::InfraError;

const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct QueueDocument {
    version: u32,
    items: Vec<QueueItem>,
}

/// [`QueueStore`] persisted as one JSON file
pub struct FileQueueStore {
    path: PathBuf,
    items: Mutex<BTreeMap<String, QueueItem>>,
}

impl FileQueueStore {
    /// Open the queue at `path`, creating an empty one if the file is absent.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> DomainResult<Self> {
        let path = path.as_ref().to_path_buf();
        let load_path = path.clone();

        let items = task::spawn_blocking(move || read_document(&load_path))
            .await
            .map_err(map_join_error)??;

        info!(items = items.len(), "file queue loaded");
        Ok(Self { path, items: Mutex::new(items) })
    }

    /// Location of the backing document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `next` and swap it in once the write has landed.
    async fn commit(
        &self,
        current: &mut BTreeMap<String, QueueItem>,
        next: BTreeMap<String, QueueItem>,
    ) -> DomainResult<()> {
        let document = QueueDocument { version: DOCUMENT_VERSION, items: next.values().cloned().collect() };
        let path = self.path.clone();

        task::spawn_blocking(move || write_document(&path, &document))
            .await
            .map_err(map_join_error)??;

        *current = next;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn enqueue(&self, item: &QueueItem) -> DomainResult<String> {
        let mut items = self.items.lock().await;
        if items.contains_key(&item.id) {
            debug!(item_id = %item.id, "queue item already stored");
            return Ok(item.id.clone());
        }

        let mut next = items.clone();
        next.insert(item.id.clone(), item.clone());
        self.commit(&mut items, next).await?;
        Ok(item.id.clone())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<QueueItem>> {
        Ok(self.items.lock().await.get(id).cloned())
    }

    async fn update(&self, id: &str, patch: &QueueItemPatch) -> DomainResult<QueueItem> {
        let mut items = self.items.lock().await;
        let mut next = items.clone();
        let item = next
            .get_mut(id)
            .ok_or_else(|| CivicSyncError::NotFound(format!("queue item {id}")))?;
        item.apply(patch);
        let updated = item.clone();

        self.commit(&mut items, next).await?;
        Ok(updated)
    }

    async fn remove(&self, id: &str) -> DomainResult<bool> {
        let mut items = self.items.lock().await;
        if !items.contains_key(id) {
            return Ok(false);
        }

        let mut next = items.clone();
        next.remove(id);
        self.commit(&mut items, next).await?;
        Ok(true)
    }

    async fn list(&self, filter: Option<&QueueFilter>) -> DomainResult<Vec<QueueItem>> {
        let mut items: Vec<QueueItem> = self
            .items
            .lock()
            .await
            .values()
            .filter(|item| filter.map_or(true, |f| f.matches(item)))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }
}

fn read_document(path: &Path) -> DomainResult<BTreeMap<String, QueueItem>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(InfraError::from(err).into()),
    };

    let document: QueueDocument =
        serde_json::from_str(&contents).map_err(|err| CivicSyncError::from(InfraError::from(err)))?;
    if document.version != DOCUMENT_VERSION {
        return Err(CivicSyncError::Database(format!(
            "unsupported queue document version {} in {}",
            document.version,
            path.display()
        )));
    }

    Ok(document.items.into_iter().map(|item| (item.id.clone(), item)).collect())
}

fn write_document(path: &Path, document: &QueueDocument) -> DomainResult<()> {
    let json = serde_json::to_vec_pretty(document)
        .map_err(|err| CivicSyncError::from(InfraError::from(err)))?;
    let tmp_path = temp_path(path);

    let io_result = (|| -> std::io::Result<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        sync_parent_dir(path)
    })();

    io_result.map_err(|err| {
        let _ = fs::remove_file(&tmp_path);
        CivicSyncError::from(InfraError::from(err))
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        Some(dir) => fs::File::open(dir)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn map_join_error(err: task::JoinError) -> CivicSyncError {
    if err.is_cancelled() {
        CivicSyncError::Internal("file queue task cancelled".into())
    } else {
        CivicSyncError::Internal(format!("file queue task panic: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use civicsync_domain::{EntityType, ItemError, ItemStatus, Operation};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn item(title: &str) -> QueueItem {
        QueueItem::new(EntityType::Report, Operation::Create, json!({ "title": title }), Utc::now())
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path().join("queue.json")).await.unwrap();

        assert!(store.list(None).await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn mutations_are_visible_after_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        let first = item("first");
        let second = item("second");

        {
            let store = FileQueueStore::open(&path).await.unwrap();
            store.enqueue(&first).await.unwrap();
            store.enqueue(&second).await.unwrap();
            store
                .update(
                    &first.id,
                    &QueueItemPatch::default()
                        .with_status(ItemStatus::Failed)
                        .with_last_error(Some(ItemError::validation("title too short"))),
                )
                .await
                .unwrap();
            assert!(store.remove(&second.id).await.unwrap());
        }

        let reopened = FileQueueStore::open(&path).await.unwrap();
        let items = reopened.list(None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, ItemStatus::Failed);
        assert_eq!(items[0].last_error, Some(ItemError::validation("title too short")));
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_on_id() {
        let dir = TempDir::new().unwrap();
        let store = FileQueueStore::open(dir.path().join("queue.json")).await.unwrap();
        let mut original = item("original");
        store.enqueue(&original).await.unwrap();

        original.payload = json!({ "title": "replayed" });
        store.enqueue(&original).await.unwrap();

        let items = store.list(None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].payload, json!({ "title": "original" }));
    }

    #[tokio::test]
    async fn unsupported_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(&path, r#"{ "version": 99, "items": [] }"#).unwrap();

        let err = FileQueueStore::open(&path).await.err().unwrap();
        assert!(matches!(err, CivicSyncError::Database(msg) if msg.contains("version 99")));
    }

    #[tokio::test]
    async fn corrupt_document_is_a_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(&path, "{ not json").unwrap();

        let err = FileQueueStore::open(&path).await.err().unwrap();
        assert!(matches!(err, CivicSyncError::Serialization(_)));
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_untouched() {
        let dir = TempDir::new().unwrap();
        // A directory where the document should be makes every rename fail
        let path = dir.path().join("queue.json");
        let store = FileQueueStore::open(&path).await.unwrap();
        fs::create_dir(&path).unwrap();

        assert!(store.enqueue(&item("lost")).await.is_err());
        assert!(store.list(None).await.unwrap().is_empty());
        assert!(!temp_path(&path).exists());
    }
}
