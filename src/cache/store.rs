//! Main cache store: TTL entries, dependency cascade and write-behind persistence

use crate::cache::{
    config::CacheConfig,
    dependency::DependencyGraph,
    entry::CacheEntry,
    invalidation::{InvalidationEvent, InvalidationReason},
    types::{CacheKey, CacheStats, SetOptions},
};
use crate::clock::{system_clock, Clock};
use crate::error::{OfflineError, Result};
use crate::storage::DurableStorage;
use parking_lot::Mutex;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Key/value cache with per-entry expiry and durable write-behind
///
/// This implementation provides:
/// - Thread-safe async access via RwLock
/// - Absolute expiry per entry, swept periodically
/// - One-level cascading invalidation through declared dependencies
/// - Periodic persistence of entries written with `persist`
///
/// Storage faults never escape `get`/`set`/`remove`; they are logged and the
/// cache keeps working from memory.
pub struct CacheService {
    /// Cache configuration
    pub(crate) config: CacheConfig,

    storage: Arc<dyn DurableStorage>,

    clock: Arc<dyn Clock>,

    /// Internal storage
    store: RwLock<CacheStore>,

    /// Serializes blob writes and removals
    persist_lock: AsyncMutex<()>,

    /// Cleanup and persistence loops
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Internal cache storage
#[derive(Default)]
struct CacheStore {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, CacheEntry>,

    /// Dependency key -> dependent keys
    dependencies: DependencyGraph,

    /// Keys written with `persist` since the last successful flush, with the
    /// write sequence number of their latest write
    persist_queue: HashMap<CacheKey, u64>,

    /// Incremented on every persisted write
    write_seq: u64,

    /// A persisted entry went away, so the blob needs rewriting
    blob_stale: bool,

    /// Running counters
    stats: CacheStats,
}

impl CacheStore {
    fn remove_entry(&mut self, key: &str) -> bool {
        self.persist_queue.remove(key);
        self.dependencies.forget_dependent(key);
        match self.entries.remove(key) {
            Some(entry) => {
                if entry.persist {
                    self.blob_stale = true;
                }
                true
            }
            None => false,
        }
    }

    /// Remove `key` and, if it is a dependency key, its direct dependents.
    /// Returns the keys whose entries were dropped.
    fn remove_cascade(&mut self, key: &str) -> Vec<CacheKey> {
        let mut removed = Vec::new();
        if self.remove_entry(key) {
            removed.push(key.to_string());
        }

        if let Some(dependents) = self.dependencies.take_dependents(key) {
            for dependent in dependents {
                if self.remove_entry(&dependent) {
                    removed.push(dependent);
                }
            }
        }

        removed
    }
}

impl CacheService {
    /// Create a cache on the system clock. Nothing is loaded and no
    /// background task runs until [`load_persisted`](Self::load_persisted)
    /// and [`start_background_tasks`](Self::start_background_tasks).
    pub fn new(config: CacheConfig, storage: Arc<dyn DurableStorage>) -> Self {
        Self::with_clock(config, storage, system_clock())
    }

    /// Create a cache reading time from `clock`
    pub fn with_clock(
        config: CacheConfig,
        storage: Arc<dyn DurableStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!("Initializing cache service with config: {:?}", config);

        Self {
            config,
            storage,
            clock,
            store: RwLock::new(CacheStore::default()),
            persist_lock: AsyncMutex::new(()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Validate the config, load the persisted blob, then start the cleanup
    /// and persistence loops
    pub async fn open(
        config: CacheConfig,
        storage: Arc<dyn DurableStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        config.validate().map_err(OfflineError::Config)?;

        let cache = Arc::new(Self::with_clock(config, storage, clock));
        if cache.config.enable_persistence {
            cache.load_persisted().await;
        }
        cache.start_background_tasks();
        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Typed read. Expired entries are removed and read as a miss.
    ///
    /// A payload that does not deserialize into `T` is a miss as well, but
    /// the entry stays for readers of the right type.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key).await?;
        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Cache entry {} has an unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Untyped read of the stored JSON payload
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_millis();
        let mut store = self.store.write().await;

        let expired = match store.entries.get(key) {
            Some(entry) => entry.is_expired_at(now),
            None => {
                debug!("Cache miss: {}", key);
                store.stats.misses += 1;
                return None;
            }
        };

        if expired {
            store.stats.misses += 1;
            store.stats.evictions_ttl += 1;
            let removed = store.remove_cascade(key);
            debug!("Cache entry expired: {} ({} keys dropped)", key, removed.len());
            return None;
        }

        store.stats.hits += 1;
        debug!("Cache hit: {}", key);
        store.entries.get(key).map(|entry| entry.data.clone())
    }

    /// Store a value. Fails only when `data` cannot be turned into JSON.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        options: SetOptions,
    ) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.set_value(key, value, options).await;
        Ok(())
    }

    /// Store an already serialized payload
    pub async fn set_value(&self, key: &str, value: Value, options: SetOptions) {
        let ttl = options
            .ttl
            .unwrap_or_else(|| self.config.ttl_with_jitter());
        let mut entry = CacheEntry::new(value, self.clock.now_millis(), ttl);
        entry.persist = options.persist;

        let mut store = self.store.write().await;

        for dependency in &options.dependencies {
            store.dependencies.add(dependency, key);
        }

        if options.persist {
            store.write_seq += 1;
            let seq = store.write_seq;
            store.persist_queue.insert(key.to_string(), seq);
        }

        if let Some(previous) = store.entries.insert(key.to_string(), entry) {
            debug!("Updated cache entry: {}", key);
            if previous.persist && !options.persist {
                store.blob_stale = true;
            }
        } else {
            debug!("Inserted cache entry: {} (ttl {:?})", key, ttl);
        }
    }

    /// Existence check honoring expiry. Never removes anything.
    pub async fn has(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        let store = self.store.read().await;
        store
            .entries
            .get(key)
            .map(|entry| !entry.is_expired_at(now))
            .unwrap_or(false)
    }

    /// Remove an entry and, when `key` is a dependency key, its direct
    /// dependents. Returns whether any entry was dropped.
    pub async fn remove(&self, key: &str) -> bool {
        let mut store = self.store.write().await;
        let removed = store.remove_cascade(key);
        store.stats.invalidations += removed.len() as u64;

        if !removed.is_empty() {
            debug!("Removed cache keys for {}: {:?}", key, removed);
        }
        !removed.is_empty()
    }

    /// Wipe memory state and the durable blob
    pub async fn clear(&self) {
        let _guard = self.persist_lock.lock().await;
        let count = {
            let mut store = self.store.write().await;
            let count = store.entries.len();
            store.entries.clear();
            store.dependencies.clear();
            store.persist_queue.clear();
            store.blob_stale = false;
            store.stats.invalidations += count as u64;
            count
        };

        if let Err(e) = self.storage.remove_item(&self.config.storage_key).await {
            warn!("Failed to remove persisted cache blob: {}", e);
        }

        info!("Cleared {} entries from cache", count);
    }

    /// Cascading removal of every key matching a regular expression
    pub async fn clear_pattern(&self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern)?;
        Ok(self.clear_matching(&regex).await)
    }

    /// Cascading removal of every cached key matched by `regex`.
    /// Returns the number of entries dropped.
    pub async fn clear_matching(&self, regex: &Regex) -> usize {
        let mut store = self.store.write().await;

        let keys: Vec<CacheKey> = store
            .entries
            .keys()
            .filter(|key| regex.is_match(key))
            .cloned()
            .collect();

        let mut removed = 0;
        for key in keys {
            removed += store.remove_cascade(&key).len();
        }
        store.stats.invalidations += removed as u64;

        let reason = InvalidationReason::PatternMatch {
            pattern: regex.as_str().to_string(),
        };
        debug!("{}: {} entries removed", reason, removed);
        removed
    }

    /// Drop everything cached for a collection after its remote data changed:
    /// the collection key itself (cascading to entries depending on it) and
    /// every key prefixed with `<collection>:`
    pub async fn invalidate_collection(&self, collection: &str) -> usize {
        let mut removed = {
            let mut store = self.store.write().await;
            let removed = store.remove_cascade(collection);
            store.stats.invalidations += removed.len() as u64;
            removed.len()
        };

        let prefix = format!("^{}:", regex::escape(collection));
        if let Ok(regex) = Regex::new(&prefix) {
            removed += self.clear_matching(&regex).await;
        }

        let reason = InvalidationReason::SyncApplied {
            collection: collection.to_string(),
        };
        debug!("{}: {} entries removed", reason, removed);
        removed
    }

    /// Remove all expired entries (with their dependents)
    pub async fn cleanup_expired(&self) -> Vec<InvalidationEvent> {
        let now = self.clock.now_millis();
        let mut store = self.store.write().await;
        let mut events = Vec::new();

        let expired_keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        if expired_keys.is_empty() {
            return events;
        }

        let mut removed = Vec::new();
        for key in &expired_keys {
            removed.extend(store.remove_cascade(key));
        }
        store.stats.evictions_ttl += expired_keys.len() as u64;

        let event = InvalidationEvent::new(InvalidationReason::Expired, removed.clone())
            .with_context(format!(
                "Cleaned up {} expired entries ({} removed including dependents)",
                expired_keys.len(),
                removed.len()
            ));
        events.push(event);

        debug!("Cleaned up {} expired entries", expired_keys.len());
        events
    }

    /// Get cache statistics
    pub async fn get_stats(&self) -> CacheStats {
        let store = self.store.read().await;
        let approx_size_bytes = serde_json::to_string(&store.entries)
            .map(|json| json.len() * 2)
            .unwrap_or(0);

        CacheStats {
            entries: store.entries.len(),
            approx_size_bytes,
            persist_queue_size: store.persist_queue.len(),
            ..store.stats.clone()
        }
    }

    /// Get number of entries in cache, expired ones included until swept
    pub async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.entries.is_empty()
    }

    /// Cache-aside read: serve from cache or run `fetch` and store its result.
    /// Fetch errors are returned and nothing is cached.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        options: SetOptions,
        fetch: F,
    ) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            return Ok(hit);
        }

        let fresh = fetch().await?;
        if let Err(e) = self.set(key, &fresh, options).await {
            warn!("Fetched value for {} could not be cached: {}", key, e);
        }
        Ok(fresh)
    }

    /// Seed memory from the persisted blob, skipping entries that already
    /// expired. Returns the number of entries loaded.
    pub async fn load_persisted(&self) -> usize {
        let raw = match self.storage.get_item(&self.config.storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return 0,
            Err(e) => {
                warn!("Failed to read persisted cache, starting empty: {}", e);
                return 0;
            }
        };

        let persisted: HashMap<CacheKey, CacheEntry> = match serde_json::from_str(&raw) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("Discarding unreadable cache blob: {}", e);
                return 0;
            }
        };

        let now = self.clock.now_millis();
        let mut store = self.store.write().await;
        let mut loaded = 0;
        let mut discarded = 0;

        for (key, mut entry) in persisted {
            if entry.is_expired_at(now) || entry.expires < entry.timestamp {
                discarded += 1;
                continue;
            }
            entry.persist = true;
            if !store.entries.contains_key(&key) {
                store.entries.insert(key, entry);
                loaded += 1;
            }
        }

        if discarded > 0 {
            store.blob_stale = true;
        }

        info!(
            "Loaded {} persisted cache entries ({} expired entries discarded)",
            loaded, discarded
        );
        loaded
    }

    /// Flush persisted entries now. Returns false when the write failed; the
    /// queued keys are then kept for the next attempt.
    pub async fn force_persist(&self) -> bool {
        match self.persist_now().await {
            Ok(Some(count)) => {
                debug!("Persisted {} cache entries", count);
                true
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Cache persistence failed, will retry: {}", e);
                false
            }
        }
    }

    async fn persist_now(&self) -> Result<Option<usize>> {
        let _guard = self.persist_lock.lock().await;
        let now = self.clock.now_millis();

        let (blob, flushed_keys, count) = {
            let mut store = self.store.write().await;
            if store.persist_queue.is_empty() && !store.blob_stale {
                return Ok(None);
            }

            let persisted: HashMap<&CacheKey, &CacheEntry> = store
                .entries
                .iter()
                .filter(|(_, entry)| entry.persist && !entry.is_expired_at(now))
                .collect();
            let blob = serde_json::to_string(&persisted)?;
            let count = persisted.len();
            let flushed_keys: Vec<(CacheKey, u64)> = store
                .persist_queue
                .iter()
                .map(|(key, seq)| (key.clone(), *seq))
                .collect();
            store.blob_stale = false;
            (blob, flushed_keys, count)
        };

        if let Err(e) = self.storage.set_item(&self.config.storage_key, &blob).await {
            self.store.write().await.blob_stale = true;
            return Err(e);
        }

        // Keys rewritten during the write stay queued for the next flush
        let mut store = self.store.write().await;
        for (key, seq) in &flushed_keys {
            if store.persist_queue.get(key) == Some(seq) {
                store.persist_queue.remove(key);
            }
        }
        Ok(Some(count))
    }

    /// Start the cleanup sweep and the persistence flush. Calling it again
    /// while they run does nothing.
    pub fn start_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        if self.config.enable_auto_cleanup {
            tasks.push(tokio::spawn(run_auto_cleanup(
                Arc::downgrade(self),
                self.config.cleanup_interval,
            )));
        }

        if self.config.enable_persistence {
            tasks.push(tokio::spawn(run_auto_persist(
                Arc::downgrade(self),
                self.config.persist_interval,
            )));
        }
    }

    /// Stop both loops and flush one last time
    pub async fn destroy(&self) {
        self.stop_background_tasks();
        if self.config.enable_persistence {
            self.force_persist().await;
        }
        info!("Cache service destroyed");
    }

    fn stop_background_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        self.stop_background_tasks();
    }
}

/// Background task for automatic cache cleanup
async fn run_auto_cleanup(cache: Weak<CacheService>, interval: Duration) {
    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        let Some(cache) = cache.upgrade() else {
            break;
        };

        let events = cache.cleanup_expired().await;
        if !events.is_empty() {
            debug!("Auto cleanup: {} events", events.len());
        }
    }
}

/// Background task for the write-behind flush
async fn run_auto_persist(cache: Weak<CacheService>, interval: Duration) {
    info!("Starting cache persistence task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        let Some(cache) = cache.upgrade() else {
            break;
        };

        cache.force_persist().await;
    }
}
