//! # GymTrack Offline (gymtrack-offline)
//!
//! Client-side caching and offline sync layer for the GymTrackPro app.
//!
//! ## Features
//!
//! - TTL cache with one-level dependency invalidation and write-behind
//!   persistence to durable key/value storage
//! - Connectivity monitor combining platform link events with periodic
//!   backend reachability probes
//! - Durable queue of offline mutations, replayed as one batch on
//!   reconnection and removed only after the backend confirms it
//! - Async-first design using tokio
//!
//! ## Cache Engine
//!
//! ```rust
//! use gymtrack_offline::{CacheConfig, CacheService, MemoryStorage, SetOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = CacheService::new(CacheConfig::in_memory(), Arc::new(MemoryStorage::new()));
//! cache.set("goals:user-1", &vec!["bench 100kg"], SetOptions::new()).await?;
//!
//! let goals: Option<Vec<String>> = cache.get("goals:user-1").await;
//! assert!(goals.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Network Monitor
//!
//! ```no_run
//! use gymtrack_offline::{
//!     ConnectivitySnapshot, ManualConnectivity, MemoryStorage, NetworkMonitor,
//!     NetworkMonitorConfig, TcpReachabilityProbe,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = ManualConnectivity::new(ConnectivitySnapshot::online());
//!     let monitor = NetworkMonitor::new(
//!         NetworkMonitorConfig::default(),
//!         source,
//!         Arc::new(TcpReachabilityProbe::new("firestore.googleapis.com:443")),
//!         Arc::new(MemoryStorage::new()),
//!     );
//!     monitor.init().await;
//!
//!     let _handle = monitor.add_listener(|status| {
//!         println!("online: {}", status.is_online());
//!     });
//!
//!     let saved = monitor
//!         .execute_when_online(|| async { Ok("saved") }, "save workout")
//!         .await;
//!     println!("{:?}", saved);
//! }
//! ```
//!
//! ## Putting it together
//!
//! [`OfflineRuntime`] builds all three components from an [`OfflineConfig`]
//! and wires the sync queue to the monitor's reconnection signal.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod network;
pub mod runtime;
pub mod storage;
pub mod sync;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey, CacheKeyBuilder, CacheService,
    CacheStats, Collection, CollectionCache, InvalidationEvent, InvalidationReason, SetOptions,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::OfflineConfig;
pub use error::{OfflineError, Result};
pub use network::{
    ConnectionState, ConnectivitySnapshot, ConnectivitySource, FnProbe, ListenerHandle,
    ManualConnectivity, NetworkMonitor, NetworkMonitorConfig, NetworkStatus, ProbeConfig,
    ProbeOutcome, ProbeResult, ReachabilityProbe, TcpReachabilityProbe,
};
pub use runtime::OfflineRuntime;
pub use storage::{DurableStorage, FileStorage, MemoryStorage};
pub use sync::{
    FnSyncHandler, NewOperation, OperationType, SyncConfig, SyncHandler, SyncOperation, SyncQueue,
    SyncState,
};
