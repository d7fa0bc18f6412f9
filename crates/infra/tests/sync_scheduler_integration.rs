//! End-to-end drains driven by the sync scheduler.
//!
//! **Coverage:**
//! - Offline enqueue, connectivity restored → exactly one submit, item synced
//! - Transient failure → backoff deadline wakes the scheduler → item synced
//!
//! **Infrastructure:**
//! - Real SQLite queue (tempdir) and WireMock backend for the first case
//! - In-memory queue and a scripted gateway under paused tokio time for the
//!   second, with a clock that follows tokio time

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use civicsync_core::{
    BackoffPolicy, Clock, ConnectivityMonitor, GatewayError, InMemoryQueueStore, QueueManager,
    RemoteApiGateway, SyncOrchestrator,
};
use civicsync_domain::{
    ConnectionKind, ConnectivityConfig, DatabaseConfig, EntityType, ItemStatus, Operation,
    SubmitResult, SyncConfig,
};
use civicsync_infra::{
    DbManager, HttpApiGateway, SqliteQueueStore, SyncMetrics, SyncScheduler, SyncSchedulerConfig,
};
use serde_json::{json, Value};
use support::{wait_until, RecordingLocalStore, TokioClock};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn scheduler_config() -> SyncSchedulerConfig {
    SyncSchedulerConfig {
        interval: Duration::from_secs(60),
        enabled: true,
        join_timeout: Duration::from_secs(5),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn restored_connectivity_drains_offline_writes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/reports"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "srv-100" })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = DbManager::open(&DatabaseConfig {
        path: dir.path().join("queue.db").to_string_lossy().into_owned(),
        pool_size: 2,
    })
    .unwrap();

    let clock: Arc<dyn Clock> = Arc::new(civicsync_core::SystemClock);
    let monitor = Arc::new(ConnectivityMonitor::from_config(
        &ConnectivityConfig { quiet_window_ms: 50 },
        clock.clone(),
    ));
    monitor.start().unwrap();

    let manager = Arc::new(QueueManager::new(
        Arc::new(SqliteQueueStore::new(Arc::new(db))),
        monitor.clone(),
        BackoffPolicy::default(),
        clock,
    ));
    let local = Arc::new(RecordingLocalStore::default());
    let gateway = HttpApiGateway::builder().base_url(server.uri()).build().unwrap();
    let orchestrator = Arc::new(SyncOrchestrator::from_config(
        manager.clone(),
        Arc::new(gateway),
        local.clone(),
        &SyncConfig { submit_timeout_seconds: 5, ..SyncConfig::default() },
    ));
    let metrics = Arc::new(SyncMetrics::new());
    let mut scheduler =
        SyncScheduler::new(orchestrator, monitor.clone(), scheduler_config(), metrics.clone());
    scheduler.start().await.unwrap();

    let id = manager
        .enqueue(EntityType::Report, Operation::Create, json!({ "title": "Flooded underpass" }))
        .await
        .unwrap();

    // Offline: nothing leaves the device
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
    assert_eq!(manager.get_item(&id).await.unwrap().status, ItemStatus::Pending);

    monitor.report(true, ConnectionKind::Wifi);

    let synced = wait_until(Duration::from_secs(5), || {
        let manager = manager.clone();
        let id = id.clone();
        async move {
            manager.get_item(&id).await.map(|item| item.status == ItemStatus::Synced).unwrap_or(false)
        }
    })
    .await;
    assert!(synced, "item should sync once connectivity returns");

    let item = manager.get_item(&id).await.unwrap();
    assert_eq!(item.server_id.as_deref(), Some("srv-100"));
    assert_eq!(item.attempt_count, 1);
    assert_eq!(local.server_id_for(&item.entity_id).as_deref(), Some("srv-100"));
    assert_eq!(metrics.snapshot().synced, 1);

    scheduler.stop().await.unwrap();
    monitor.stop().await.unwrap();
}

/// Fails transiently `failures` times, then succeeds
struct FlakyGateway {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteApiGateway for FlakyGateway {
    async fn submit(
        &self,
        _entity_type: EntityType,
        _operation: Operation,
        _payload: &Value,
    ) -> Result<SubmitResult, GatewayError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Ok(SubmitResult::TransientError { message: "HTTP 503".into() })
        } else {
            Ok(SubmitResult::Success { server_id: "srv-7".into() })
        }
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_deadline_wakes_the_scheduler() {
    let clock = TokioClock::new();
    let monitor = Arc::new(ConnectivityMonitor::new(Duration::from_millis(100), clock.clone()));
    monitor.start().unwrap();
    monitor.report(true, ConnectionKind::Cellular);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(monitor.is_online());

    let manager = Arc::new(QueueManager::new(
        Arc::new(InMemoryQueueStore::new()),
        monitor.clone(),
        BackoffPolicy::default(),
        clock,
    ));
    let gateway = Arc::new(FlakyGateway { failures: 2, calls: AtomicUsize::new(0) });
    let orchestrator = Arc::new(SyncOrchestrator::new(
        manager.clone(),
        gateway.clone(),
        Arc::new(RecordingLocalStore::default()),
    ));
    let metrics = Arc::new(SyncMetrics::new());
    let mut scheduler =
        SyncScheduler::new(orchestrator, monitor.clone(), scheduler_config(), metrics.clone());
    scheduler.start().await.unwrap();

    let started = tokio::time::Instant::now();
    let id = manager
        .enqueue(EntityType::Task, Operation::Create, json!({ "title": "Inspect drain" }))
        .await
        .unwrap();

    let synced = wait_until(Duration::from_secs(30), || {
        let manager = manager.clone();
        let id = id.clone();
        async move {
            manager.get_item(&id).await.map(|item| item.status == ItemStatus::Synced).unwrap_or(false)
        }
    })
    .await;
    assert!(synced, "retries should run without an explicit trigger");

    // Two gaps of 1s and 2s, well before the 60s interval
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < Duration::from_secs(10));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.synced, 1);
    assert_eq!(snapshot.retries, 2);

    scheduler.stop().await.unwrap();
    monitor.stop().await.unwrap();
}
