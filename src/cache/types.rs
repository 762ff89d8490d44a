//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Cache key type
pub type CacheKey = String;

/// Per-write options for [`CacheService::set`](crate::cache::CacheService::set)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Time-to-live; `None` uses the configured default (15 minutes)
    pub ttl: Option<Duration>,

    /// Include this entry in the durable cache blob
    pub persist: bool,

    /// Dependency keys whose removal also removes this entry
    pub dependencies: Vec<CacheKey>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn persist(mut self) -> Self {
        self.persist = true;
        self
    }

    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CacheKey>,
    {
        self.dependencies.extend(keys.into_iter().map(Into::into));
        self
    }
}

/// Statistics for cache monitoring
///
/// Informational only. Eviction is purely time based and never consults
/// these numbers.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheStats {
    /// Number of entries currently in cache
    pub entries: usize,

    /// Rough in-memory footprint: serialized length times two (UTF-16 code units)
    pub approx_size_bytes: usize,

    /// Keys waiting for the next persistence flush
    pub persist_queue_size: usize,

    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Number of entries dropped because their TTL elapsed
    pub evictions_ttl: u64,

    /// Number of explicit or cascading removals
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ entries: {}, size: ~{} bytes, persist_queue: {}, hits: {}, misses: {}, hit_rate: {:.2}% }}",
            self.entries,
            self.approx_size_bytes,
            self.persist_queue_size,
            self.hits,
            self.misses,
            self.hit_rate()
        )
    }
}
