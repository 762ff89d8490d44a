//! Collection-level caching helpers for the app's data services
//!
//! Keys are laid out as `<collection>:<identifier>[?k=v&...]` and every entry
//! stored through [`CollectionCache`] declares its collection name as a
//! dependency. Removing the collection key (which the sync queue does after a
//! successful batch) therefore drops everything cached for it.

use crate::cache::{
    store::CacheService,
    types::{CacheKey, CacheStats, SetOptions},
};
use crate::error::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Backend collections the client caches and mutates
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    /// Logged workout sessions
    Workouts,

    /// Body weight entries
    WeightLog,

    /// Fitness goals
    Goals,

    /// User profile documents
    Users,

    /// User-defined exercises
    CustomExercises,

    /// Any other collection, by name
    Custom(String),
}

impl Collection {
    /// Backend collection name
    pub fn name(&self) -> &str {
        match self {
            Collection::Workouts => "workouts",
            Collection::WeightLog => "weightLog",
            Collection::Goals => "goals",
            Collection::Users => "users",
            Collection::CustomExercises => "customExercises",
            Collection::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for Collection {
    fn from(name: &str) -> Self {
        match name {
            "workouts" => Collection::Workouts,
            "weightLog" => Collection::WeightLog,
            "goals" => Collection::Goals,
            "users" => Collection::Users,
            "customExercises" => Collection::CustomExercises,
            other => Collection::Custom(other.to_string()),
        }
    }
}

/// Cache key builder for collection data
pub struct CacheKeyBuilder {
    collection: Collection,
    identifier: String,
    params: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            identifier: String::new(),
            params: Vec::new(),
        }
    }

    /// Set the primary identifier (usually the user id)
    pub fn identifier(mut self, id: impl Into<String>) -> Self {
        self.identifier = id.into();
        self
    }

    /// Add a parameter to the key
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        let mut key = format!("{}:{}", self.collection, self.identifier);

        if !self.params.is_empty() {
            let params_str: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            key.push_str(&format!("?{}", params_str.join("&")));
        }

        key
    }
}

/// Collection-aware wrapper used by the data services
#[derive(Clone)]
pub struct CollectionCache {
    cache: Arc<CacheService>,
    ttl: Option<Duration>,
    persist: bool,
}

impl CollectionCache {
    /// Wrap an existing cache. Entries use the cache's default TTL and are
    /// persisted so lists survive an app restart.
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self {
            cache,
            ttl: None,
            persist: true,
        }
    }

    /// Override the TTL of entries written through this wrapper
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Keep entries written through this wrapper in memory only
    pub fn memory_only(mut self) -> Self {
        self.persist = false;
        self
    }

    /// Get the underlying cache instance
    pub fn inner(&self) -> Arc<CacheService> {
        self.cache.clone()
    }

    fn options(&self, collection: &Collection) -> SetOptions {
        SetOptions {
            ttl: self.ttl,
            persist: self.persist,
            dependencies: vec![collection.name().to_string()],
        }
    }

    fn key(collection: &Collection, owner_id: &str) -> CacheKey {
        CacheKeyBuilder::new(collection.clone())
            .identifier(owner_id)
            .build()
    }

    /// Cache the documents of a collection owned by a user
    pub async fn store_documents<T: Serialize>(
        &self,
        collection: &Collection,
        owner_id: &str,
        documents: &[T],
    ) -> Result<()> {
        let key = Self::key(collection, owner_id);
        self.cache.set(&key, documents, self.options(collection)).await
    }

    /// Get cached documents of a collection owned by a user
    pub async fn get_documents<T: DeserializeOwned>(
        &self,
        collection: &Collection,
        owner_id: &str,
    ) -> Option<Vec<T>> {
        self.cache.get(&Self::key(collection, owner_id)).await
    }

    /// Serve documents from cache or load them with `fetch`
    pub async fn fetch_documents<T, F, Fut>(
        &self,
        collection: &Collection,
        owner_id: &str,
        fetch: F,
    ) -> anyhow::Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<T>>>,
    {
        let key = Self::key(collection, owner_id);
        self.cache
            .get_or_fetch(&key, self.options(collection), fetch)
            .await
    }

    /// Cache a single document
    pub async fn store_document<T: Serialize>(
        &self,
        collection: &Collection,
        document_id: &str,
        document: &T,
    ) -> Result<()> {
        let key = CacheKeyBuilder::new(collection.clone())
            .identifier(document_id)
            .param("doc", "1")
            .build();
        self.cache.set(&key, document, self.options(collection)).await
    }

    /// Get a single cached document
    pub async fn get_document<T: DeserializeOwned>(
        &self,
        collection: &Collection,
        document_id: &str,
    ) -> Option<T> {
        let key = CacheKeyBuilder::new(collection.clone())
            .identifier(document_id)
            .param("doc", "1")
            .build();
        self.cache.get(&key).await
    }

    /// Drop everything cached for a collection
    pub async fn invalidate(&self, collection: &Collection) -> usize {
        self.cache.invalidate_collection(collection.name()).await
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        self.cache.get_stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::storage::MemoryStorage;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct WeightEntry {
        kg: f64,
        date: String,
    }

    fn collection_cache() -> CollectionCache {
        let cache = CacheService::new(CacheConfig::in_memory(), Arc::new(MemoryStorage::new()));
        CollectionCache::new(Arc::new(cache))
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(Collection::WeightLog.to_string(), "weightLog");
        assert_eq!(Collection::from("customExercises"), Collection::CustomExercises);
        assert_eq!(
            Collection::from("measurements"),
            Collection::Custom("measurements".to_string())
        );
    }

    #[test]
    fn test_cache_key_builder() {
        let key = CacheKeyBuilder::new(Collection::Workouts)
            .identifier("user-1")
            .param("month", "2024-05")
            .param("limit", "20")
            .build();

        assert_eq!(key, "workouts:user-1?month=2024-05&limit=20");

        let key = CacheKeyBuilder::new(Collection::Goals)
            .identifier("user-1")
            .build();
        assert_eq!(key, "goals:user-1");
    }

    #[tokio::test]
    async fn test_store_and_invalidate_documents() {
        let cache = collection_cache();
        let entries = vec![WeightEntry {
            kg: 81.5,
            date: "2024-05-01".to_string(),
        }];

        cache
            .store_documents(&Collection::WeightLog, "user-1", &entries)
            .await
            .unwrap();
        cache
            .store_document(&Collection::WeightLog, "entry-9", &entries[0])
            .await
            .unwrap();

        let cached: Option<Vec<WeightEntry>> =
            cache.get_documents(&Collection::WeightLog, "user-1").await;
        assert_eq!(cached, Some(entries.clone()));
        assert_eq!(
            cache
                .get_document::<WeightEntry>(&Collection::WeightLog, "entry-9")
                .await,
            Some(entries[0].clone())
        );

        assert_eq!(cache.invalidate(&Collection::WeightLog).await, 2);
        assert!(cache
            .get_documents::<WeightEntry>(&Collection::WeightLog, "user-1")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_fetch_documents_uses_cache() {
        let cache = collection_cache();

        let fetched: Vec<String> = cache
            .fetch_documents(&Collection::Goals, "user-1", || async {
                Ok(vec!["lose 5kg".to_string()])
            })
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);

        let cached: Vec<String> = cache
            .fetch_documents(&Collection::Goals, "user-1", || async {
                Err::<Vec<String>, _>(anyhow::anyhow!("network unavailable"))
            })
            .await
            .unwrap();
        assert_eq!(cached, fetched);
        assert_eq!(cache.stats().await.entries, 1);
    }
}
