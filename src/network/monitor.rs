//! Process-wide connectivity monitor
//!
//! Combines link-level samples from a [`ConnectivitySource`] with periodic
//! backend reachability probes into one [`NetworkStatus`], and fans changes
//! out to listeners.

use crate::error::Result;
use crate::network::{
    listeners::{invoke, ListenerHandle, ListenerRegistry, StatusListener},
    probe::{run_probe, ProbeConfig, ProbeResult, ReachabilityProbe},
    source::ConnectivitySource,
    status::{ConnectionState, ConnectivitySnapshot, NetworkStatus},
};
use crate::storage::DurableStorage;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc::UnboundedReceiver, oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_STATUS_STORAGE_KEY: &str = "network_status";

/// Network monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMonitorConfig {
    pub probe: ProbeConfig,

    /// Storage key of the persisted status blob
    pub status_storage_key: String,

    /// Persist the status on every change and reload it on `init`
    pub persist_status: bool,
}

impl Default for NetworkMonitorConfig {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            status_storage_key: DEFAULT_STATUS_STORAGE_KEY.to_string(),
            persist_status: true,
        }
    }
}

/// Connectivity monitor
///
/// Cheap to clone; clones share the same status, listeners and background
/// tasks. Locks are never held across an `.await`.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    config: NetworkMonitorConfig,
    source: Arc<dyn ConnectivitySource>,
    probe: Arc<dyn ReachabilityProbe>,
    storage: Arc<dyn DurableStorage>,

    status: RwLock<NetworkStatus>,

    /// Serializes writes of the status blob
    persist_lock: AsyncMutex<()>,

    /// A live sample has been applied since `init`
    sampled: AtomicBool,

    last_probe: RwLock<Option<ProbeResult>>,
    listeners: Arc<ListenerRegistry>,
    initialized: AtomicBool,

    /// Held while a probe runs; concurrent probes are skipped
    connection_testing: AtomicBool,

    /// Restarts the probe interval after an out-of-band probe
    rearm: Arc<Notify>,

    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Releases the probe guard and re-arms the schedule on every exit path
struct ProbeGuard<'a> {
    flag: &'a AtomicBool,
    rearm: &'a Notify,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.rearm.notify_waiters();
    }
}

impl MonitorInner {
    /// Apply one sample. Returns the new status when either flag changed,
    /// together with the previous `is_connected`.
    fn apply_sample(
        &self,
        is_connected: bool,
        is_internet_reachable: bool,
    ) -> (bool, Option<NetworkStatus>) {
        let mut status = self.status.write();
        let previous = status.clone();

        status.is_connected = is_connected;
        status.is_internet_reachable = is_internet_reachable;
        status.last_checked = Utc::now();
        self.sampled.store(true, Ordering::SeqCst);

        let changed = previous.differs_from(&status).then(|| status.clone());
        (previous.is_connected, changed)
    }

    /// Apply a sample and publish it when it changed anything
    async fn update(&self, is_connected: bool, is_internet_reachable: bool) -> bool {
        let (_, changed) = self.apply_sample(is_connected, is_internet_reachable);
        match changed {
            Some(status) => {
                self.publish(&status).await;
                true
            }
            None => false,
        }
    }

    async fn publish(&self, status: &NetworkStatus) {
        info!(
            "Network status changed: {} (connected={}, reachable={})",
            ConnectionState::from_status(status),
            status.is_connected,
            status.is_internet_reachable
        );
        self.listeners.notify(status);
        self.persist_status().await;
    }

    /// Write the status as it is when the write starts, so the last writer
    /// always stores the live state
    async fn persist_status(&self) {
        if !self.config.persist_status {
            return;
        }

        let _guard = self.persist_lock.lock().await;
        let status = self.status.read().clone();
        let blob = match serde_json::to_string(&status) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Failed to serialize network status: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .storage
            .set_item(&self.config.status_storage_key, &blob)
            .await
        {
            warn!("Failed to persist network status: {}", e);
        }
    }

    async fn load_persisted_status(&self) -> Result<bool> {
        let Some(blob) = self
            .storage
            .get_item(&self.config.status_storage_key)
            .await?
        else {
            return Ok(false);
        };

        let persisted: NetworkStatus = serde_json::from_str(&blob)?;
        debug!("Loaded persisted network status: {:?}", persisted);
        *self.status.write() = persisted;
        Ok(true)
    }

    async fn handle_snapshot(self: &Arc<Self>, snapshot: ConnectivitySnapshot) {
        debug!("Connectivity sample: {:?}", snapshot);

        let (was_connected, changed) =
            self.apply_sample(snapshot.is_connected, snapshot.is_internet_reachable);
        if let Some(status) = changed {
            self.publish(&status).await;
        }

        if !was_connected && snapshot.is_connected {
            let mut tasks = self.tasks.lock();
            if !self.initialized.load(Ordering::SeqCst) {
                return;
            }
            debug!("Link came up, probing backend reachability");
            let inner = self.clone();
            tasks.retain(|task| !task.is_finished());
            tasks.push(tokio::spawn(async move {
                inner.test_connection().await;
            }));
        }
    }

    async fn test_connection(&self) -> Option<ProbeResult> {
        if self
            .connection_testing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Connection test already running, skipping");
            return None;
        }
        let _guard = ProbeGuard {
            flag: &self.connection_testing,
            rearm: &self.rearm,
        };

        match self.source.fetch().await {
            Ok(snapshot) if snapshot.is_connected => {
                let result = run_probe(self.probe.as_ref(), &self.config.probe).await;
                debug!(
                    "Probe result: {:?} in {}ms (retries: {})",
                    result.outcome, result.response_time_ms, result.retry_count
                );
                *self.last_probe.write() = Some(result.clone());
                self.update(true, result.is_reachable()).await;
                Some(result)
            }
            Ok(_) => {
                self.update(false, false).await;
                None
            }
            Err(e) => {
                warn!("Connectivity fetch failed during connection test: {}", e);
                let is_connected = self.status.read().is_connected;
                self.update(is_connected, false).await;
                None
            }
        }
    }

    fn stop_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

impl NetworkMonitor {
    pub fn new(
        config: NetworkMonitorConfig,
        source: Arc<dyn ConnectivitySource>,
        probe: Arc<dyn ReachabilityProbe>,
        storage: Arc<dyn DurableStorage>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                source,
                probe,
                storage,
                status: RwLock::new(NetworkStatus::disconnected()),
                persist_lock: AsyncMutex::new(()),
                sampled: AtomicBool::new(false),
                last_probe: RwLock::new(None),
                listeners: Arc::new(ListenerRegistry::new()),
                initialized: AtomicBool::new(false),
                connection_testing: AtomicBool::new(false),
                rearm: Arc::new(Notify::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &NetworkMonitorConfig {
        &self.inner.config
    }

    /// Load the persisted status, subscribe to the connectivity source and
    /// start the probe schedule. Later calls do nothing until
    /// [`cleanup`](Self::cleanup).
    pub async fn init(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            debug!("Network monitor already initialized");
            return;
        }

        if self.inner.config.persist_status {
            match self.inner.load_persisted_status().await {
                Ok(true) => {}
                Ok(false) => debug!("No persisted network status"),
                Err(e) => warn!("Failed to load persisted network status: {}", e),
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let mut tasks = vec![tokio::spawn(run_event_loop(
            weak.clone(),
            self.inner.source.subscribe(),
        ))];

        if self.inner.config.probe.enabled {
            tasks.push(tokio::spawn(run_probe_loop(
                weak,
                self.inner.rearm.clone(),
                self.inner.config.probe.interval,
            )));
        }

        self.inner.tasks.lock().extend(tasks);
        info!(
            "Network monitor initialized (probe interval: {:?})",
            self.inner.config.probe.interval
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Current status snapshot
    pub fn get_state(&self) -> NetworkStatus {
        self.inner.status.read().clone()
    }

    /// Coarse state; `Unknown` until the first live sample
    pub fn connection_state(&self) -> ConnectionState {
        if !self.inner.sampled.load(Ordering::SeqCst) {
            return ConnectionState::Unknown;
        }
        ConnectionState::from_status(&self.inner.status.read())
    }

    pub fn is_online(&self) -> bool {
        self.inner.status.read().is_online()
    }

    /// Result of the most recent reachability probe
    pub fn last_probe(&self) -> Option<ProbeResult> {
        self.inner.last_probe.read().clone()
    }

    /// Register a listener. It is called right away with the current state
    /// and then on every change.
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&NetworkStatus) + Send + Sync + 'static,
    {
        let listener: StatusListener = Arc::new(listener);
        let id = self.inner.listeners.insert(listener.clone());
        invoke(id, &listener, &self.get_state());
        ListenerHandle::new(id, &self.inner.listeners)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// One-shot read from the connectivity source. Leaves the status and the
    /// probe schedule alone.
    pub async fn check_connection(&self) -> bool {
        match self.inner.source.fetch().await {
            Ok(snapshot) => snapshot.is_online(),
            Err(e) => {
                warn!("Connectivity check failed: {}", e);
                false
            }
        }
    }

    /// Probe now. Returns `None` when another probe was already running or
    /// the link is down.
    pub async fn test_connection(&self) -> Option<ProbeResult> {
        self.inner.test_connection().await
    }

    /// Probe now, restart the probe interval and return the resulting state
    pub async fn force_connection_check(&self) -> NetworkStatus {
        self.inner.test_connection().await;
        self.get_state()
    }

    /// Run `action` every time a notification shows the backend online,
    /// including the immediate replay when it already is. Failures are
    /// logged.
    pub fn add_reconnection_listener<F, Fut>(
        &self,
        action: F,
        label: impl Into<String>,
    ) -> ListenerHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let action = Arc::new(action);
        let label: Arc<str> = Arc::from(label.into());

        self.add_listener(move |status| {
            if !status.is_online() {
                return;
            }

            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                warn!("No runtime available for reconnection action '{}'", label);
                return;
            };

            let action = action.clone();
            let label = label.clone();
            runtime.spawn(async move {
                debug!("Running reconnection action '{}'", label);
                if let Err(e) = action().await {
                    error!("Reconnection action '{}' failed: {:#}", label, e);
                }
            });
        })
    }

    /// Run `task` once the backend is online (right away if it already is).
    /// Returns `None` when the task fails or the monitor is cleaned up
    /// before connectivity returns.
    pub async fn execute_when_online<T, F, Fut>(&self, task: F, name: &str) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if !self.is_online() {
            info!("Offline, deferring '{}' until connectivity returns", name);

            let (tx, rx) = oneshot::channel::<()>();
            let tx = Mutex::new(Some(tx));
            let handle = self.add_listener(move |status| {
                if status.is_online() {
                    if let Some(tx) = tx.lock().take() {
                        let _ = tx.send(());
                    }
                }
            });

            let woke = rx.await.is_ok();
            handle.remove();
            if !woke {
                warn!("Monitor stopped before '{}' could run", name);
                return None;
            }
        }

        match task().await {
            Ok(value) => {
                debug!("Task '{}' completed", name);
                Some(value)
            }
            Err(e) => {
                error!("Task '{}' failed: {:#}", name, e);
                None
            }
        }
    }

    /// Stop the source subscription and the probe loop, and drop every
    /// listener
    pub fn cleanup(&self) {
        self.inner.initialized.store(false, Ordering::SeqCst);
        self.inner.stop_tasks();
        self.inner.listeners.clear();
        info!("Network monitor cleaned up");
    }
}

/// Apply connectivity samples until the source closes or the monitor goes away
async fn run_event_loop(
    inner: Weak<MonitorInner>,
    mut events: UnboundedReceiver<ConnectivitySnapshot>,
) {
    while let Some(snapshot) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_snapshot(snapshot).await;
    }
    debug!("Connectivity event loop stopped");
}

/// Periodic probe; the interval restarts whenever a probe runs out of band
async fn run_probe_loop(inner: Weak<MonitorInner>, rearm: Arc<Notify>, interval: Duration) {
    info!("Starting reachability probe task (interval: {:?})", interval);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = rearm.notified() => continue,
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.test_connection().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::probe::FnProbe;
    use crate::network::source::ManualConnectivity;
    use crate::storage::MemoryStorage;
    use std::sync::atomic::AtomicUsize;

    async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    fn monitor_with(
        source: Arc<ManualConnectivity>,
        reachable: Arc<AtomicBool>,
        storage: Arc<MemoryStorage>,
    ) -> NetworkMonitor {
        let probe = FnProbe::new(move || {
            let reachable = reachable.load(Ordering::SeqCst);
            async move { Ok(reachable) }
        });
        NetworkMonitor::new(
            NetworkMonitorConfig::default(),
            source,
            Arc::new(probe),
            storage,
        )
    }

    #[tokio::test]
    async fn test_state_unknown_before_init() {
        let monitor = monitor_with(
            ManualConnectivity::new(ConnectivitySnapshot::online()),
            Arc::new(AtomicBool::new(true)),
            Arc::new(MemoryStorage::new()),
        );

        assert_eq!(monitor.connection_state(), ConnectionState::Unknown);
        assert!(!monitor.get_state().is_connected);
        assert!(!monitor.is_initialized());
    }

    #[tokio::test]
    async fn test_init_applies_current_sample() {
        let storage = Arc::new(MemoryStorage::new());
        let monitor = monitor_with(
            ManualConnectivity::new(ConnectivitySnapshot::online()),
            Arc::new(AtomicBool::new(true)),
            storage.clone(),
        );

        monitor.init().await;
        monitor.init().await;

        assert!(wait_for(|| monitor.is_online()).await);
        assert_eq!(monitor.connection_state(), ConnectionState::Online);

        let mut persisted = None;
        for _ in 0..100 {
            if let Some(blob) = storage.get_item(DEFAULT_STATUS_STORAGE_KEY).await.unwrap() {
                persisted = Some(serde_json::from_str::<NetworkStatus>(&blob).unwrap());
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(persisted.unwrap().is_online());

        monitor.cleanup();
    }

    #[tokio::test]
    async fn test_probe_downgrades_reachability() {
        let source = ManualConnectivity::new(ConnectivitySnapshot::offline());
        let reachable = Arc::new(AtomicBool::new(false));
        let monitor = monitor_with(source.clone(), reachable, Arc::new(MemoryStorage::new()));
        monitor.init().await;

        source.set_online();

        assert!(
            wait_for(|| monitor.connection_state() == ConnectionState::LimitedConnectivity).await
        );
        let probe = monitor.last_probe().unwrap();
        assert!(!probe.is_reachable());

        monitor.cleanup();
    }

    #[tokio::test]
    async fn test_add_listener_replays_and_removes() {
        let source = ManualConnectivity::new(ConnectivitySnapshot::offline());
        let monitor = monitor_with(
            source.clone(),
            Arc::new(AtomicBool::new(true)),
            Arc::new(MemoryStorage::new()),
        );
        monitor.init().await;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = monitor.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        source.set_online();
        assert!(wait_for(|| calls.load(Ordering::SeqCst) >= 2).await);

        assert!(handle.remove());
        assert_eq!(monitor.listener_count(), 0);

        monitor.cleanup();
    }

    #[tokio::test]
    async fn test_check_connection_does_not_touch_state() {
        let source = ManualConnectivity::new(ConnectivitySnapshot::online());
        let monitor = monitor_with(
            source,
            Arc::new(AtomicBool::new(true)),
            Arc::new(MemoryStorage::new()),
        );

        assert!(monitor.check_connection().await);
        assert!(!monitor.get_state().is_connected);
    }

    #[tokio::test]
    async fn test_force_connection_check_when_link_down() {
        let source = ManualConnectivity::new(ConnectivitySnapshot::limited());
        let monitor = monitor_with(
            source.clone(),
            Arc::new(AtomicBool::new(true)),
            Arc::new(MemoryStorage::new()),
        );

        let status = monitor.force_connection_check().await;
        assert!(status.is_online());

        source.set_offline();
        let status = monitor.force_connection_check().await;
        assert!(!status.is_connected);
        assert!(!status.is_internet_reachable);
    }

    #[tokio::test]
    async fn test_execute_when_online_runs_immediately() {
        let source = ManualConnectivity::new(ConnectivitySnapshot::online());
        let monitor = monitor_with(
            source,
            Arc::new(AtomicBool::new(true)),
            Arc::new(MemoryStorage::new()),
        );
        monitor.force_connection_check().await;

        let value = monitor
            .execute_when_online(|| async { Ok(42) }, "answer")
            .await;
        assert_eq!(value, Some(42));

        let failed: Option<u32> = monitor
            .execute_when_online(
                || async { Err::<u32, _>(anyhow::anyhow!("boom")) },
                "failing",
            )
            .await;
        assert!(failed.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_cancels_reconnect_probe() {
        let source = ManualConnectivity::new(ConnectivitySnapshot::offline());
        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());

        let (probe_entered, probe_gate) = (entered.clone(), gate.clone());
        let probe = FnProbe::new(move || {
            let entered = probe_entered.clone();
            let gate = probe_gate.clone();
            async move {
                entered.notify_one();
                gate.notified().await;
                Ok(true)
            }
        });
        let config = NetworkMonitorConfig {
            probe: ProbeConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let monitor = NetworkMonitor::new(
            config,
            source.clone(),
            Arc::new(probe),
            Arc::new(MemoryStorage::new()),
        );
        monitor.init().await;

        source.set_online();
        entered.notified().await;
        assert_eq!(monitor.inner.tasks.lock().len(), 2);

        monitor.cleanup();
        assert!(wait_for(|| !monitor.inner.connection_testing.load(Ordering::SeqCst)).await);

        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(monitor.last_probe().is_none());
        assert!(monitor.inner.tasks.lock().is_empty());
    }
}
