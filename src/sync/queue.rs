//! Durable FIFO of offline mutations

use crate::cache::CacheService;
use crate::clock::{system_clock, Clock};
use crate::error::OfflineError;
use crate::network::{ListenerHandle, NetworkMonitor};
use crate::storage::DurableStorage;
use crate::sync::{
    config::SyncConfig,
    handler::SyncHandler,
    operation::{NewOperation, SyncOperation},
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Observable queue state for UI indicators
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncState {
    pub pending_operations: Vec<SyncOperation>,
    pub is_syncing: bool,
    pub last_synced: Option<DateTime<Utc>>,
    /// Error of the most recent failed batch; cleared by the next success
    pub last_error: Option<String>,
}

impl SyncState {
    pub fn pending_count(&self) -> usize {
        self.pending_operations.len()
    }
}

/// Queue of mutations made while offline, replayed as one batch when the
/// backend is reachable again
///
/// Operations leave the queue only after the handler confirms the batch.
pub struct SyncQueue {
    config: SyncConfig,
    storage: Arc<dyn DurableStorage>,
    handler: Arc<dyn SyncHandler>,
    monitor: Option<NetworkMonitor>,
    cache: Option<Arc<CacheService>>,
    clock: Arc<dyn Clock>,

    state: watch::Sender<SyncState>,
    is_syncing: AtomicBool,

    /// Serializes blob writes so the latest snapshot is written last
    persist_lock: tokio::sync::Mutex<()>,

    reconnect_listener: Mutex<Option<ListenerHandle>>,
}

/// Resets the syncing flags on every exit path
struct SyncGuard<'a> {
    queue: &'a SyncQueue,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.queue.is_syncing.store(false, Ordering::SeqCst);
        self.queue.state.send_modify(|state| state.is_syncing = false);
    }
}

impl SyncQueue {
    pub fn new(
        config: SyncConfig,
        storage: Arc<dyn DurableStorage>,
        handler: Arc<dyn SyncHandler>,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self {
            config,
            storage,
            handler,
            monitor: None,
            cache: None,
            clock: system_clock(),
            state,
            is_syncing: AtomicBool::new(false),
            persist_lock: tokio::sync::Mutex::new(()),
            reconnect_listener: Mutex::new(None),
        }
    }

    /// Gate immediate syncs on this monitor and allow [`attach`](Self::attach)
    pub fn with_monitor(mut self, monitor: NetworkMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Invalidate this cache after successful batches
    pub fn with_cache(mut self, cache: Arc<CacheService>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Without a monitor the backend is assumed reachable
    fn is_online(&self) -> bool {
        self.monitor.as_ref().map_or(true, |monitor| monitor.is_online())
    }

    /// Enqueue a mutation and persist the queue. Syncs right away when online.
    /// Returns the assigned operation id.
    pub async fn add_operation(&self, operation: NewOperation) -> String {
        let operation = operation.into_operation(self.clock.now_millis());
        let id = operation.id.clone();
        info!(
            "Queued {} on {} ({})",
            operation.op_type, operation.collection, id
        );

        self.state
            .send_modify(|state| state.pending_operations.push(operation));
        self.persist_pending().await;

        if self.is_online() {
            self.sync_pending_operations().await;
        }
        id
    }

    /// Send the pending operations to the handler as one batch
    ///
    /// Does nothing when a sync is already running or nothing is pending.
    /// On success the synced operations are removed; operations queued while
    /// the batch was in flight are sent in a follow-up batch if still online.
    /// On failure the batch stays queued. Returns whether anything was synced.
    pub async fn sync_pending_operations(&self) -> bool {
        if self.pending_count() == 0 {
            return false;
        }

        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync already in progress, skipping");
            return false;
        }
        let _guard = SyncGuard { queue: self };

        let mut synced_any = false;
        loop {
            let batch = self.state.borrow().pending_operations.clone();
            if batch.is_empty() {
                break;
            }

            self.state.send_modify(|state| state.is_syncing = true);
            info!("Syncing {} pending operations", batch.len());

            match self.run_batch(&batch).await {
                Ok(()) => {
                    self.complete_batch(&batch).await;
                    synced_any = true;
                    if !self.is_online() {
                        break;
                    }
                }
                Err(message) => {
                    error!(
                        "Sync of {} operations failed, keeping them queued: {}",
                        batch.len(),
                        message
                    );
                    self.state
                        .send_modify(|state| state.last_error = Some(message));
                    break;
                }
            }
        }
        synced_any
    }

    async fn run_batch(&self, batch: &[SyncOperation]) -> Result<(), String> {
        match tokio::time::timeout(self.config.sync_timeout, self.handler.sync(batch)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err(OfflineError::timeout(self.config.sync_timeout, "sync handler").to_string()),
        }
    }

    async fn complete_batch(&self, batch: &[SyncOperation]) {
        let synced: HashSet<&str> = batch.iter().map(|op| op.id.as_str()).collect();
        let now = self.clock.now();
        self.state.send_modify(|state| {
            state
                .pending_operations
                .retain(|op| !synced.contains(op.id.as_str()));
            state.last_synced = Some(now);
            state.last_error = None;
        });
        info!("Synced {} operations", batch.len());

        self.persist_pending().await;
        self.invalidate_collections(batch).await;
    }

    async fn invalidate_collections(&self, batch: &[SyncOperation]) {
        if !self.config.invalidate_cache {
            return;
        }
        let Some(cache) = &self.cache else {
            return;
        };

        let mut seen = HashSet::new();
        let collections: Vec<&str> = batch
            .iter()
            .map(|op| op.collection.as_str())
            .filter(|collection| seen.insert(*collection))
            .collect();

        let removed = join_all(
            collections
                .iter()
                .map(|collection| cache.invalidate_collection(collection)),
        )
        .await;
        for (collection, removed) in collections.iter().zip(removed) {
            debug!("Invalidated {} cache entries for {}", removed, collection);
        }
    }

    async fn persist_pending(&self) {
        let _write = self.persist_lock.lock().await;
        let pending = self.state.borrow().pending_operations.clone();

        let blob = match serde_json::to_string(&pending) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Failed to serialize pending operations: {}", e);
                return;
            }
        };

        if let Err(e) = self.storage.set_item(&self.config.storage_key, &blob).await {
            warn!("Failed to persist pending operations: {}", e);
        }
    }

    /// Restore the persisted queue. Operations already in memory stay queued
    /// after the restored ones. Returns the number restored.
    pub async fn load_pending(&self) -> usize {
        let blob = match self.storage.get_item(&self.config.storage_key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return 0,
            Err(e) => {
                warn!("Failed to read pending operations: {}", e);
                return 0;
            }
        };

        let restored: Vec<SyncOperation> = match serde_json::from_str(&blob) {
            Ok(ops) => ops,
            Err(e) => {
                warn!("Discarding unreadable pending operations blob: {}", e);
                return 0;
            }
        };

        let count = restored.len();
        self.state.send_modify(|state| {
            let restored_ids: HashSet<String> = restored.iter().map(|op| op.id.clone()).collect();
            let mut merged = restored;
            merged.extend(
                state
                    .pending_operations
                    .drain(..)
                    .filter(|op| !restored_ids.contains(&op.id)),
            );
            state.pending_operations = merged;
        });

        info!("Restored {} pending operations", count);
        count
    }

    /// Drop every queued operation (e.g. on logout)
    pub async fn clear_pending(&self) {
        self.state.send_modify(|state| {
            state.pending_operations.clear();
            state.last_error = None;
        });

        let _write = self.persist_lock.lock().await;
        if let Err(e) = self.storage.remove_item(&self.config.storage_key).await {
            warn!("Failed to remove pending operations blob: {}", e);
        }
        info!("Pending operations cleared");
    }

    /// Sync automatically each time the monitor reports the backend online
    /// with work pending. Returns false without a monitor.
    pub fn attach(self: &Arc<Self>) -> bool {
        let Some(monitor) = &self.monitor else {
            return false;
        };

        let queue = Arc::downgrade(self);
        let was_online = AtomicBool::new(false);
        let handle = monitor.add_listener(move |status| {
            let online = status.is_online();
            let previously_online = was_online.swap(online, Ordering::SeqCst);
            if !online || previously_online {
                return;
            }

            let Some(queue) = queue.upgrade() else {
                return;
            };
            if queue.pending_count() == 0 {
                return;
            }

            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                warn!("No runtime available to sync after reconnection");
                return;
            };
            info!("Back online with {} pending operations", queue.pending_count());
            runtime.spawn(async move {
                queue.sync_pending_operations().await;
            });
        });

        if let Some(previous) = self.reconnect_listener.lock().replace(handle) {
            previous.remove();
        }
        true
    }

    /// Stop reacting to reconnections
    pub fn detach(&self) {
        if let Some(handle) = self.reconnect_listener.lock().take() {
            handle.remove();
        }
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Receiver updated on every state change
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending_operations.len()
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.state.borrow().last_synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, SetOptions};
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;
    use crate::sync::handler::FnSyncHandler;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_handler(calls: Arc<AtomicUsize>, fail: Arc<AtomicBool>) -> Arc<dyn SyncHandler> {
        Arc::new(FnSyncHandler::new(move |_ops: Vec<SyncOperation>| {
            calls.fetch_add(1, Ordering::SeqCst);
            let fail = fail.load(Ordering::SeqCst);
            async move {
                if fail {
                    return Err(anyhow::anyhow!("backend unavailable"));
                }
                Ok(())
            }
        }))
    }

    #[tokio::test]
    async fn test_add_operation_syncs_without_monitor() {
        let calls = Arc::new(AtomicUsize::new(0));
        let storage = Arc::new(MemoryStorage::new());
        let queue = SyncQueue::new(
            SyncConfig::default(),
            storage.clone(),
            counting_handler(calls.clone(), Arc::new(AtomicBool::new(false))),
        )
        .with_clock(ManualClock::new(1_000));

        let id = queue
            .add_operation(NewOperation::create("workouts", json!({ "name": "legs" })))
            .await;

        assert!(id.starts_with("1000"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_count(), 0);
        assert!(queue.last_synced().is_some());
        assert!(!queue.is_syncing());

        let blob = storage.get_item("pending_operations").await.unwrap().unwrap();
        assert_eq!(blob, "[]");
    }

    #[tokio::test]
    async fn test_failed_batch_is_retained() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fail = Arc::new(AtomicBool::new(true));
        let queue = SyncQueue::new(
            SyncConfig::default(),
            Arc::new(MemoryStorage::new()),
            counting_handler(calls.clone(), fail.clone()),
        );

        queue
            .add_operation(NewOperation::update("goals", json!({ "id": "g1" })))
            .await;

        let state = queue.state();
        assert_eq!(state.pending_count(), 1);
        assert!(state.last_error.unwrap().contains("backend unavailable"));
        assert!(!state.is_syncing);

        fail.store(false, Ordering::SeqCst);
        assert!(queue.sync_pending_operations().await);
        assert_eq!(queue.pending_count(), 0);
        assert!(queue.state().last_error.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sync_on_empty_queue_is_noop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let queue = SyncQueue::new(
            SyncConfig::default(),
            Arc::new(MemoryStorage::new()),
            counting_handler(calls.clone(), Arc::new(AtomicBool::new(false))),
        );

        assert!(!queue.sync_pending_operations().await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_handler_times_out() {
        let handler = FnSyncHandler::new(|_ops: Vec<SyncOperation>| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        let config = SyncConfig {
            sync_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let queue = SyncQueue::new(config, Arc::new(MemoryStorage::new()), Arc::new(handler));

        queue
            .add_operation(NewOperation::delete("weightLog", json!({ "id": "w1" })))
            .await;

        let state = queue.state();
        assert_eq!(state.pending_count(), 1);
        assert!(state.last_error.unwrap().contains("timed out"));
        assert!(!queue.is_syncing());
    }

    #[tokio::test]
    async fn test_load_pending_restores_queue() {
        let storage = Arc::new(MemoryStorage::new());
        let ops = vec![
            NewOperation::create("workouts", json!({ "n": 1 })).into_operation(10),
            NewOperation::create("workouts", json!({ "n": 2 })).into_operation(20),
        ];
        storage
            .set_item("pending_operations", &serde_json::to_string(&ops).unwrap())
            .await
            .unwrap();

        let queue = SyncQueue::new(
            SyncConfig::default(),
            storage.clone(),
            counting_handler(Arc::new(AtomicUsize::new(0)), Arc::new(AtomicBool::new(false))),
        );

        assert_eq!(queue.load_pending().await, 2);
        assert_eq!(queue.state().pending_operations, ops);

        queue.clear_pending().await;
        assert_eq!(queue.pending_count(), 0);
        assert!(storage.get_item("pending_operations").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_pending_ignores_corrupt_blob() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item("pending_operations", "{not json").await.unwrap();

        let queue = SyncQueue::new(
            SyncConfig::default(),
            storage,
            counting_handler(Arc::new(AtomicUsize::new(0)), Arc::new(AtomicBool::new(false))),
        );
        assert_eq!(queue.load_pending().await, 0);
    }

    #[tokio::test]
    async fn test_successful_sync_invalidates_collections() {
        let cache = Arc::new(CacheService::new(
            CacheConfig::in_memory(),
            Arc::new(MemoryStorage::new()),
        ));
        cache
            .set(
                "workouts:user-1",
                &json!(["push"]),
                SetOptions::new().depends_on(["workouts"]),
            )
            .await
            .unwrap();
        cache
            .set("goals:user-1", &json!(["run 5k"]), SetOptions::new())
            .await
            .unwrap();

        let queue = SyncQueue::new(
            SyncConfig::default(),
            Arc::new(MemoryStorage::new()),
            counting_handler(Arc::new(AtomicUsize::new(0)), Arc::new(AtomicBool::new(false))),
        )
        .with_cache(cache.clone());

        queue
            .add_operation(NewOperation::create("workouts", json!({ "name": "pull" })))
            .await;

        assert!(!cache.has("workouts:user-1").await);
        assert!(cache.has("goals:user-1").await);
    }

    #[tokio::test]
    async fn test_subscribe_sees_updates() {
        let queue = SyncQueue::new(
            SyncConfig::default(),
            Arc::new(MemoryStorage::new()),
            counting_handler(Arc::new(AtomicUsize::new(0)), Arc::new(AtomicBool::new(true))),
        );
        let mut rx = queue.subscribe();

        queue
            .add_operation(NewOperation::create("users", json!({})))
            .await;

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().pending_count(), 1);
    }
}
