//! Aggregate configuration for the offline layer

use crate::cache::CacheConfig;
use crate::error::{OfflineError, Result};
use crate::network::NetworkMonitorConfig;
use crate::sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Backend host probed when no other probe is supplied
pub const DEFAULT_REACHABILITY_ADDRESS: &str = "firestore.googleapis.com:443";

/// Configuration of every offline component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    pub cache: CacheConfig,
    pub network: NetworkMonitorConfig,
    pub sync: SyncConfig,

    /// `host:port` used by the TCP reachability probe
    pub reachability_address: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            network: NetworkMonitorConfig::default(),
            sync: SyncConfig::default(),
            reachability_address: DEFAULT_REACHABILITY_ADDRESS.to_string(),
        }
    }
}

impl OfflineConfig {
    /// Defaults overridden by `GYMTRACK_*` environment variables. A `.env`
    /// file in the working directory is loaded first when present.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(secs) = parse_var(&lookup, "GYMTRACK_CACHE_TTL_SECS")? {
            config.cache.default_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "GYMTRACK_CLEANUP_INTERVAL_SECS")? {
            config.cache.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "GYMTRACK_PERSIST_INTERVAL_SECS")? {
            config.cache.persist_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "GYMTRACK_PROBE_INTERVAL_SECS")? {
            config.network.probe.interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var(&lookup, "GYMTRACK_PROBE_TIMEOUT_MS")? {
            config.network.probe.timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var(&lookup, "GYMTRACK_SYNC_TIMEOUT_SECS")? {
            config.sync.sync_timeout = Duration::from_secs(secs);
        }
        if let Some(address) = lookup("GYMTRACK_REACHABILITY_HOST") {
            config.reachability_address = address;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate every component config
    pub fn validate(&self) -> Result<()> {
        self.cache.validate().map_err(OfflineError::Config)?;
        self.network.probe.validate().map_err(OfflineError::Config)?;
        self.sync.validate().map_err(OfflineError::Config)?;
        if self.reachability_address.trim().is_empty() {
            return Err(OfflineError::Config(
                "reachability address must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| OfflineError::Config(format!("{}={:?}: {}", name, raw, e))),
        None => Ok(None),
    }
}
