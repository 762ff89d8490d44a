//! Composition root owning the cache, monitor and sync queue

use crate::cache::{CacheService, CollectionCache};
use crate::clock::{system_clock, Clock};
use crate::config::OfflineConfig;
use crate::error::Result;
use crate::network::{ConnectivitySource, NetworkMonitor, ReachabilityProbe, TcpReachabilityProbe};
use crate::storage::DurableStorage;
use crate::sync::{SyncHandler, SyncQueue};
use std::sync::Arc;
use tracing::info;

/// The offline layer of one app instance
///
/// Built once at startup and shared by the data services. Dropping it
/// without [`shutdown`](Self::shutdown) stops the background tasks but skips
/// the final cache flush.
///
/// # Example
///
/// ```no_run
/// use gymtrack_offline::{
///     ConnectivitySnapshot, FileStorage, FnSyncHandler, ManualConnectivity, OfflineConfig,
///     OfflineRuntime, SyncOperation,
/// };
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let source = ManualConnectivity::new(ConnectivitySnapshot::offline());
///     let handler = FnSyncHandler::new(|ops: Vec<SyncOperation>| async move {
///         println!("uploading {} operations", ops.len());
///         Ok(())
///     });
///
///     let runtime = OfflineRuntime::start(
///         OfflineConfig::from_env()?,
///         Arc::new(FileStorage::new("./offline-data")),
///         source.clone(),
///         Arc::new(handler),
///     )
///     .await?;
///
///     source.set_online();
///     runtime.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct OfflineRuntime {
    config: OfflineConfig,
    cache: Arc<CacheService>,
    monitor: NetworkMonitor,
    sync: Arc<SyncQueue>,
}

impl OfflineRuntime {
    /// Start with a TCP probe against `config.reachability_address`
    pub async fn start(
        config: OfflineConfig,
        storage: Arc<dyn DurableStorage>,
        source: Arc<dyn ConnectivitySource>,
        handler: Arc<dyn SyncHandler>,
    ) -> Result<Self> {
        let probe = Arc::new(TcpReachabilityProbe::new(
            config.reachability_address.clone(),
        ));
        Self::start_with(config, storage, source, probe, handler, system_clock()).await
    }

    /// Load persisted state, start the background tasks and wire the sync
    /// queue to the monitor
    pub async fn start_with(
        config: OfflineConfig,
        storage: Arc<dyn DurableStorage>,
        source: Arc<dyn ConnectivitySource>,
        probe: Arc<dyn ReachabilityProbe>,
        handler: Arc<dyn SyncHandler>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let cache = CacheService::open(config.cache.clone(), storage.clone(), clock.clone()).await?;

        let monitor = NetworkMonitor::new(config.network.clone(), source, probe, storage.clone());
        monitor.init().await;

        let sync = Arc::new(
            SyncQueue::new(config.sync.clone(), storage, handler)
                .with_monitor(monitor.clone())
                .with_cache(cache.clone())
                .with_clock(clock),
        );
        let restored = sync.load_pending().await;
        sync.attach();

        info!(
            "Offline runtime started ({} cached entries, {} pending operations)",
            cache.len().await,
            restored
        );

        Ok(Self {
            config,
            cache,
            monitor,
            sync,
        })
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    /// Collection-aware view of the cache
    pub fn collections(&self) -> CollectionCache {
        CollectionCache::new(self.cache.clone())
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn sync_queue(&self) -> &Arc<SyncQueue> {
        &self.sync
    }

    /// Stop every background task and flush the cache one last time
    pub async fn shutdown(&self) {
        self.sync.detach();
        self.monitor.cleanup();
        self.cache.destroy().await;
        info!("Offline runtime stopped");
    }
}
