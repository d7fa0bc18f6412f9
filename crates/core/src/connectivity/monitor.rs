//! Debounced connectivity monitor.
//!
//! The platform layer feeds raw reachability readings through
//! [`ConnectivityMonitor::report`]. A background task coalesces them: a reading
//! only settles once the quiet window passes with no newer reading, and
//! listeners hear about settled changes only. A settled transition to online
//! is the signal the scheduler uses to start draining the queue.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use civicsync_core::clock::SystemClock;
//! use civicsync_core::connectivity::ConnectivityMonitor;
//! use civicsync_domain::{ConnectionKind, ConnectivityConfig, ConnectivityState};
//!
//! # async fn example() -> civicsync_core::connectivity::MonitorResult<()> {
//! let monitor = ConnectivityMonitor::new(Duration::from_millis(500), Arc::new(SystemClock));
//! let _subscription = monitor.subscribe(Arc::new(|state: &ConnectivityState| {
//!     tracing::info!(online = state.is_online, "connectivity changed");
//! }));
//!
//! monitor.start()?;
//! monitor.report(true, ConnectionKind::Wifi);
//! // ... application runs ...
//! monitor.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use civicsync_domain::{ConnectionKind, ConnectivityConfig, ConnectivityState};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::ports::ConnectivityProbe;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle errors for the debounce task
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("connectivity monitor is already running")]
    AlreadyRunning,

    #[error("connectivity monitor is not running")]
    NotRunning,

    #[error("debounce task did not stop within {0:?}")]
    Timeout(Duration),

    #[error("debounce task failed: {0}")]
    TaskFailed(String),
}

pub type MonitorResult<T> = Result<T, MonitorError>;

/// Receives settled connectivity changes
pub trait ConnectivityListener: Send + Sync {
    fn on_change(&self, state: &ConnectivityState);
}

impl<F> ConnectivityListener for F
where
    F: Fn(&ConnectivityState) + Send + Sync,
{
    fn on_change(&self, state: &ConnectivityState) {
        self(state)
    }
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    is_online: bool,
    kind: ConnectionKind,
    received_at: Instant,
}

type ReadingReceiver = mpsc::UnboundedReceiver<Reading>;

struct Shared {
    state: RwLock<ConnectivityState>,
    listeners: Mutex<BTreeMap<u64, Arc<dyn ConnectivityListener>>>,
    next_listener_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn settle(&self, reading: Reading) {
        let state = {
            let mut state = self.state.write();
            if !state.differs_from(reading.is_online, reading.kind) {
                debug!(online = reading.is_online, kind = %reading.kind, "Reading unchanged");
                return;
            }
            *state = ConnectivityState {
                is_online: reading.is_online,
                connection_kind: reading.kind,
                changed_at: self.clock.now(),
            };
            *state
        };

        info!(online = state.is_online, kind = %state.connection_kind, "Connectivity changed");

        // Call listeners outside the lock so they may subscribe or unsubscribe
        let listeners: Vec<_> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener.on_change(&state);
        }
    }

    fn remove_listener(&self, id: u64) -> bool {
        self.listeners.lock().remove(&id).is_some()
    }
}

struct Worker {
    cancellation: CancellationToken,
    handle: JoinHandle<ReadingReceiver>,
}

/// Debounced connectivity monitor with explicit lifecycle
pub struct ConnectivityMonitor {
    shared: Arc<Shared>,
    quiet_window: Duration,
    readings_tx: Mutex<mpsc::UnboundedSender<Reading>>,
    // Parked while the debounce task is stopped
    readings_rx: Mutex<Option<ReadingReceiver>>,
    worker: Mutex<Option<Worker>>,
}

impl ConnectivityMonitor {
    /// Create a stopped monitor that starts out offline
    pub fn new(quiet_window: Duration, clock: Arc<dyn Clock>) -> Self {
        let (readings_tx, readings_rx) = mpsc::unbounded_channel();
        let initial = ConnectivityState::offline(clock.now());
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(initial),
                listeners: Mutex::new(BTreeMap::new()),
                next_listener_id: AtomicU64::new(1),
                clock,
            }),
            quiet_window,
            readings_tx: Mutex::new(readings_tx),
            readings_rx: Mutex::new(Some(readings_rx)),
            worker: Mutex::new(None),
        }
    }

    /// Stopped monitor using the configured quiet window
    pub fn from_config(config: &ConnectivityConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(Duration::from_millis(config.quiet_window_ms), clock)
    }

    pub fn quiet_window(&self) -> Duration {
        self.quiet_window
    }

    /// Last settled state
    pub fn state(&self) -> ConnectivityState {
        *self.shared.state.read()
    }

    pub fn is_online(&self) -> bool {
        self.shared.state.read().is_online
    }

    /// Raw reachability reading from the platform
    ///
    /// Readings reported while the monitor is stopped are buffered and
    /// debounced once it starts.
    pub fn report(&self, is_online: bool, kind: ConnectionKind) {
        let reading = Reading { is_online, kind, received_at: Instant::now() };
        if self.readings_tx.lock().send(reading).is_err() {
            warn!("Connectivity reading dropped: debounce channel closed");
        }
    }

    /// Register a listener for settled changes
    pub fn subscribe(&self, listener: Arc<dyn ConnectivityListener>) -> Subscription {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.lock().insert(id, listener);
        debug!(listener_id = id, "Connectivity listener subscribed");
        Subscription { id, shared: Some(Arc::downgrade(&self.shared)) }
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|w| !w.handle.is_finished())
    }

    /// Spawn the debounce task
    #[instrument(skip(self))]
    pub fn start(&self) -> MonitorResult<()> {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return Err(MonitorError::AlreadyRunning);
        }

        let Some(readings_rx) = self.readings_rx.lock().take() else {
            return Err(MonitorError::TaskFailed("reading channel unavailable".to_string()));
        };

        let cancellation = CancellationToken::new();
        let handle = tokio::spawn(debounce_loop(
            Arc::clone(&self.shared),
            readings_rx,
            self.quiet_window,
            cancellation.clone(),
        ));

        *worker = Some(Worker { cancellation, handle });
        info!(quiet_window_ms = self.quiet_window.as_millis() as u64, "Connectivity monitor started");
        Ok(())
    }

    /// Cancel the debounce task and wait for it to finish
    ///
    /// A reading still inside its quiet window is discarded.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> MonitorResult<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Err(MonitorError::NotRunning);
        };

        worker.cancellation.cancel();

        match tokio::time::timeout(JOIN_TIMEOUT, worker.handle).await {
            Ok(Ok(readings_rx)) => {
                *self.readings_rx.lock() = Some(readings_rx);
                info!("Connectivity monitor stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Debounce task panicked");
                self.replace_channel();
                Err(MonitorError::TaskFailed(e.to_string()))
            }
            Err(_) => {
                warn!("Debounce task did not complete within timeout");
                self.replace_channel();
                Err(MonitorError::Timeout(JOIN_TIMEOUT))
            }
        }
    }

    /// Fresh reading channel after the old receiver was lost with its task
    ///
    /// Readings buffered in the old channel are dropped.
    fn replace_channel(&self) {
        let (readings_tx, readings_rx) = mpsc::unbounded_channel();
        *self.readings_tx.lock() = readings_tx;
        *self.readings_rx.lock() = Some(readings_rx);
    }
}

impl ConnectivityProbe for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        ConnectivityMonitor::is_online(self)
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancellation.cancel();
        }
    }
}

/// Handle that keeps a listener registered
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    shared: Option<Weak<Shared>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the listener now
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(shared) = self.shared.take().and_then(|weak| weak.upgrade()) {
            if shared.remove_listener(self.id) {
                debug!(listener_id = self.id, "Connectivity listener unsubscribed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn debounce_loop(
    shared: Arc<Shared>,
    mut readings: ReadingReceiver,
    quiet_window: Duration,
    cancel: CancellationToken,
) -> ReadingReceiver {
    let mut pending: Option<Reading> = None;

    loop {
        let deadline = pending.map(|reading| reading.received_at + quiet_window);

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Debounce loop cancelled");
                break;
            }
            reading = readings.recv() => match reading {
                Some(reading) => pending = Some(reading),
                None => break,
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(reading) = pending.take() {
                    shared.settle(reading);
                }
            }
        }
    }

    readings
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::clock::SystemClock;

    fn monitor() -> ConnectivityMonitor {
        ConnectivityMonitor::new(Duration::from_millis(500), Arc::new(SystemClock))
    }

    fn recorder() -> (Arc<Mutex<Vec<ConnectivityState>>>, Arc<dyn ConnectivityListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn ConnectivityListener> =
            Arc::new(move |state: &ConnectivityState| sink.lock().push(*state));
        (seen, listener)
    }

    async fn settle_for(duration: Duration) {
        tokio::time::sleep(duration).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reading_settles_after_quiet_window() {
        let monitor = monitor();
        let (seen, listener) = recorder();
        let _sub = monitor.subscribe(listener);
        monitor.start().unwrap();

        monitor.report(true, ConnectionKind::Wifi);
        settle_for(Duration::from_millis(400)).await;
        assert!(!monitor.is_online());
        assert!(seen.lock().is_empty());

        settle_for(Duration::from_millis(200)).await;
        assert!(monitor.is_online());
        assert_eq!(monitor.state().connection_kind, ConnectionKind::Wifi);
        assert_eq!(seen.lock().len(), 1);

        monitor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_readings_coalesce() {
        let monitor = monitor();
        let (seen, listener) = recorder();
        let _sub = monitor.subscribe(listener);
        monitor.start().unwrap();

        for _ in 0..5 {
            monitor.report(true, ConnectionKind::Cellular);
            settle_for(Duration::from_millis(100)).await;
            monitor.report(false, ConnectionKind::None);
            settle_for(Duration::from_millis(100)).await;
        }
        monitor.report(true, ConnectionKind::Cellular);
        settle_for(Duration::from_millis(600)).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_online);
        assert_eq!(seen[0].connection_kind, ConnectionKind::Cellular);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_reading_is_not_announced() {
        let monitor = monitor();
        let (seen, listener) = recorder();
        let _sub = monitor.subscribe(listener);
        monitor.start().unwrap();

        monitor.report(false, ConnectionKind::None);
        settle_for(Duration::from_millis(600)).await;
        assert!(seen.lock().is_empty());

        monitor.report(true, ConnectionKind::Wifi);
        settle_for(Duration::from_millis(600)).await;
        monitor.report(true, ConnectionKind::Ethernet);
        settle_for(Duration::from_millis(600)).await;

        let kinds: Vec<_> = seen.lock().iter().map(|s| s.connection_kind).collect();
        assert_eq!(kinds, vec![ConnectionKind::Wifi, ConnectionKind::Ethernet]);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_and_drop_remove_listeners() {
        let monitor = monitor();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let first = monitor.subscribe(Arc::new(move |_: &ConnectivityState| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let (_, listener) = recorder();
        let second = monitor.subscribe(listener);
        assert_eq!(monitor.listener_count(), 2);

        first.unsubscribe();
        assert_eq!(monitor.listener_count(), 1);
        drop(second);
        assert_eq!(monitor.listener_count(), 0);

        monitor.start().unwrap();
        monitor.report(true, ConnectionKind::Wifi);
        settle_for(Duration::from_millis(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_errors_and_restart() {
        let monitor = monitor();
        assert_eq!(monitor.stop().await, Err(MonitorError::NotRunning));

        monitor.start().unwrap();
        assert!(monitor.is_running());
        assert_eq!(monitor.start(), Err(MonitorError::AlreadyRunning));
        monitor.stop().await.unwrap();
        assert!(!monitor.is_running());

        // Buffered while stopped, debounced after restart
        monitor.report(true, ConnectionKind::Wifi);
        monitor.start().unwrap();
        settle_for(Duration::from_millis(600)).await;
        assert!(monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_after_task_panic() {
        let monitor = monitor();
        let failing = monitor.subscribe(Arc::new(|_: &ConnectivityState| {
            panic!("listener blew up");
        }));
        monitor.start().unwrap();
        monitor.report(true, ConnectionKind::Wifi);
        settle_for(Duration::from_millis(600)).await;
        assert!(!monitor.is_running());

        assert!(matches!(monitor.stop().await, Err(MonitorError::TaskFailed(_))));
        drop(failing);

        let (seen, listener) = recorder();
        let _sub = monitor.subscribe(listener);
        monitor.start().unwrap();
        monitor.report(false, ConnectionKind::None);
        settle_for(Duration::from_millis(600)).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].is_online);
        monitor.stop().await.unwrap();
    }

    #[test]
    fn quiet_window_comes_from_config() {
        let monitor = ConnectivityMonitor::from_config(
            &ConnectivityConfig { quiet_window_ms: 1_250 },
            Arc::new(SystemClock),
        );
        assert_eq!(monitor.quiet_window(), Duration::from_millis(1_250));
        assert_eq!(
            ConnectivityMonitor::from_config(&ConnectivityConfig::default(), Arc::new(SystemClock))
                .quiet_window(),
            Duration::from_millis(civicsync_domain::constants::DEFAULT_QUIET_WINDOW_MS)
        );
    }
}
