//! Sync queue configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PENDING_STORAGE_KEY: &str = "pending_operations";

/// Configuration for the sync queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Storage key of the pending-operations blob
    pub storage_key: String,

    /// Upper bound for one handler call; a batch exceeding it counts as failed
    pub sync_timeout: Duration,

    /// Invalidate cached data of every collection touched by a synced batch
    pub invalidate_cache: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_PENDING_STORAGE_KEY.to_string(),
            sync_timeout: Duration::from_secs(30),
            invalidate_cache: true,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.storage_key.is_empty() {
            return Err("sync storage key must not be empty".to_string());
        }
        if self.sync_timeout.is_zero() {
            return Err("sync timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sync_config() {
        let config = SyncConfig::default();
        assert_eq!(config.storage_key, "pending_operations");
        assert_eq!(config.sync_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());

        let invalid = SyncConfig {
            sync_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }
}
