//! Restart durability for the persistent queue stores.
//!
//! Writes queued while offline must survive the process going away: after
//! reopening the store every item is still `pending` with its original
//! payload, in the order it was written.

use std::sync::Arc;
use std::time::Duration;

use civicsync_core::{BackoffPolicy, ConnectivityMonitor, QueueManager, QueueStore, SystemClock};
use civicsync_domain::{DatabaseConfig, EntityType, ItemStatus, Operation};
use civicsync_infra::{DbManager, FileQueueStore, SqliteQueueStore};
use serde_json::{json, Value};
use tempfile::TempDir;

fn offline_manager(store: Arc<dyn QueueStore>) -> QueueManager {
    let clock = Arc::new(SystemClock);
    // Never started, so it stays offline
    let monitor = Arc::new(ConnectivityMonitor::new(Duration::from_millis(500), clock.clone()));
    QueueManager::new(store, monitor, BackoffPolicy::default(), clock)
}

fn writes() -> Vec<(EntityType, Operation, Value)> {
    vec![
        (
            EntityType::Report,
            Operation::Create,
            json!({ "title": "Pothole on Main St", "category": "roads", "lat": 52.1, "lng": 4.3 }),
        ),
        (EntityType::Task, Operation::Update, json!({ "id": "task-9", "status": "in_progress" })),
        (EntityType::Media, Operation::Create, json!({ "report_id": "r-1", "uri": "file:///a.jpg" })),
    ]
}

async fn enqueue_all(manager: &QueueManager) -> Vec<String> {
    let mut ids = Vec::new();
    for (entity_type, operation, payload) in writes() {
        ids.push(manager.enqueue(entity_type, operation, payload).await.unwrap());
    }
    ids
}

async fn assert_pending_as_written(store: Arc<dyn QueueStore>, ids: &[String]) {
    let items = store.list(None).await.unwrap();
    assert_eq!(items.len(), 3);

    let listed: Vec<&str> = items.iter().map(|item| item.id.as_str()).collect();
    let expected: Vec<&str> = ids.iter().map(String::as_str).collect();
    assert_eq!(listed, expected);

    for (item, (entity_type, operation, payload)) in items.iter().zip(writes()) {
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempt_count, 0);
        assert_eq!(item.entity_type, entity_type);
        assert_eq!(item.operation, operation);
        assert_eq!(item.payload, payload);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sqlite_queue_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        path: dir.path().join("queue.db").to_string_lossy().into_owned(),
        pool_size: 2,
    };

    let ids = {
        let store = Arc::new(SqliteQueueStore::new(Arc::new(DbManager::open(&config).unwrap())));
        let manager = offline_manager(store);
        enqueue_all(&manager).await
    };

    let reopened = Arc::new(SqliteQueueStore::new(Arc::new(DbManager::open(&config).unwrap())));
    assert_pending_as_written(reopened, &ids).await;
}

#[tokio::test]
async fn file_queue_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.json");

    let ids = {
        let store = Arc::new(FileQueueStore::open(&path).await.unwrap());
        let manager = offline_manager(store);
        enqueue_all(&manager).await
    };

    let reopened = Arc::new(FileQueueStore::open(&path).await.unwrap());
    assert_pending_as_written(reopened, &ids).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupted_item_is_requeued_after_restart() {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        path: dir.path().join("queue.db").to_string_lossy().into_owned(),
        pool_size: 2,
    };

    let id = {
        let store = Arc::new(SqliteQueueStore::new(Arc::new(DbManager::open(&config).unwrap())));
        let manager = offline_manager(store.clone());
        let id = manager
            .enqueue(EntityType::Report, Operation::Create, json!({ "title": "Broken light" }))
            .await
            .unwrap();
        // Simulate a crash mid-submission
        store
            .update(
                &id,
                &civicsync_domain::QueueItemPatch::default()
                    .with_status(ItemStatus::Processing)
                    .with_attempt_count(1),
            )
            .await
            .unwrap();
        id
    };

    let store = Arc::new(SqliteQueueStore::new(Arc::new(DbManager::open(&config).unwrap())));
    let manager = offline_manager(store);
    assert_eq!(manager.recover_interrupted().await.unwrap(), 1);

    let item = manager.get_item(&id).await.unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.attempt_count, 1);
}
