//! Configuration for the cache system

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage key of the persisted cache blob
pub const DEFAULT_CACHE_STORAGE_KEY: &str = "gymtrack_cache";

/// Configuration for the cache engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live used when a write does not give one
    pub default_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0) applied to the default TTL only.
    /// Zero keeps expiry exact.
    pub ttl_jitter: f64,

    /// Run the periodic expired-entry sweep
    pub enable_auto_cleanup: bool,

    /// Interval of the expired-entry sweep
    pub cleanup_interval: Duration,

    /// Run the periodic write-behind flush
    pub enable_persistence: bool,

    /// Interval of the write-behind flush
    pub persist_interval: Duration,

    /// Durable storage key holding the cache blob
    pub storage_key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // 15 minutes
            default_ttl: Duration::from_secs(15 * 60),
            ttl_jitter: 0.0,
            enable_auto_cleanup: true,
            // Sweep every 10 minutes
            cleanup_interval: Duration::from_secs(10 * 60),
            enable_persistence: true,
            // Flush every minute
            persist_interval: Duration::from_secs(60),
            storage_key: DEFAULT_CACHE_STORAGE_KEY.to_string(),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.default_ttl.is_zero() {
            return Err("default_ttl must be greater than 0".to_string());
        }

        if self.cleanup_interval.is_zero() {
            return Err("cleanup_interval must be greater than 0".to_string());
        }

        if self.persist_interval.is_zero() {
            return Err("persist_interval must be greater than 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err("ttl_jitter must be between 0.0 and 1.0".to_string());
        }

        if self.storage_key.trim().is_empty() {
            return Err("storage_key must not be empty".to_string());
        }

        Ok(())
    }

    /// Default TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.default_ttl;
        }

        let base_secs = self.default_ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::from_secs_f64(final_secs)
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    default_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
    enable_persistence: Option<bool>,
    persist_interval: Option<Duration>,
    storage_key: Option<String>,
}

impl CacheConfigBuilder {
    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    pub fn enable_persistence(mut self, enable: bool) -> Self {
        self.enable_persistence = Some(enable);
        self
    }

    pub fn persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = Some(interval);
        self
    }

    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = Some(key.into());
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            enable_persistence: self
                .enable_persistence
                .unwrap_or(defaults.enable_persistence),
            persist_interval: self.persist_interval.unwrap_or(defaults.persist_interval),
            storage_key: self.storage_key.unwrap_or(defaults.storage_key),
        }
    }
}

/// Preset configurations
impl CacheConfig {
    /// Short-lived data such as the active workout session
    pub fn short_lived() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(120),
            ..Default::default()
        }
    }

    /// Slowly changing reference data (exercise library, goals)
    pub fn reference_data() -> Self {
        Self {
            default_ttl: Duration::from_secs(24 * 3600),
            ttl_jitter: 0.10,
            ..Default::default()
        }
    }

    /// Memory only, nothing written to durable storage
    pub fn in_memory() -> Self {
        Self {
            enable_persistence: false,
            ..Default::default()
        }
    }
}
