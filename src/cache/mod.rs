//! # Cache Engine
//!
//! In-process key/value cache used by the data services to avoid refetching
//! workouts, weight logs, goals and profile data.
//!
//! ## Features
//!
//! - **TTL-Based Expiration**: every entry carries an absolute expiry; reads of
//!   expired entries are misses and a periodic sweep removes them
//! - **Dependency Invalidation**: entries may name dependency keys; removing a
//!   dependency key removes its direct dependents (one level only)
//! - **Write-Behind Persistence**: entries written with `persist` are flushed
//!   to durable storage every minute and reloaded on startup
//! - **Soft Failure**: storage faults are logged, the cache keeps working from
//!   memory
//!
//! Eviction is purely time based; there is no size or LRU limit.
//!
//! ## Example
//!
//! ```rust
//! use gymtrack_offline::cache::{CacheConfig, CacheService, SetOptions};
//! use gymtrack_offline::storage::MemoryStorage;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = CacheService::new(CacheConfig::default(), Arc::new(MemoryStorage::new()));
//!
//! cache
//!     .set(
//!         "workouts:user-1",
//!         &vec!["push day", "leg day"],
//!         SetOptions::new()
//!             .ttl(Duration::from_secs(300))
//!             .persist()
//!             .depends_on(["workouts"]),
//!     )
//!     .await?;
//!
//! let workouts: Option<Vec<String>> = cache.get("workouts:user-1").await;
//! assert_eq!(workouts.map(|w| w.len()), Some(2));
//!
//! // Removing the dependency key drops the list as well
//! cache.remove("workouts").await;
//! assert!(!cache.has("workouts:user-1").await);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dependency;
pub mod entry;
pub mod integration;
pub mod invalidation;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder, DEFAULT_CACHE_STORAGE_KEY};
pub use dependency::DependencyGraph;
pub use entry::CacheEntry;
pub use integration::{CacheKeyBuilder, Collection, CollectionCache};
pub use invalidation::{InvalidationEvent, InvalidationReason};
pub use store::CacheService;
pub use types::{CacheKey, CacheStats, SetOptions};
