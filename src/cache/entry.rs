//! Cache entry with absolute expiration

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A cache slot as held in memory and written to the persisted blob
///
/// Times are epoch milliseconds. `expires >= timestamp` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached payload
    pub data: Value,

    /// When the entry was written
    pub timestamp: i64,

    /// When the entry stops being served
    pub expires: i64,

    /// Whether the entry belongs in the durable blob
    #[serde(skip)]
    pub(crate) persist: bool,
}

impl CacheEntry {
    /// Create an entry written at `now` that lives for `ttl`
    pub fn new(data: Value, now: i64, ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            data,
            timestamp: now,
            expires: now.saturating_add(ttl_ms),
            persist: false,
        }
    }

    /// True once `now` has reached the expiration time
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires <= now
    }

    /// Remaining lifetime, `None` when already expired
    pub fn time_until_expiration(&self, now: i64) -> Option<Duration> {
        if self.is_expired_at(now) {
            None
        } else {
            Some(Duration::from_millis((self.expires - now) as u64))
        }
    }

    /// Time since the entry was written
    pub fn age(&self, now: i64) -> Duration {
        Duration::from_millis(now.saturating_sub(self.timestamp).max(0) as u64)
    }

    pub fn is_persistent(&self) -> bool {
        self.persist
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_entry_creation() {
        let entry = CacheEntry::new(json!({"reps": 10}), 1_000, Duration::from_secs(60));

        assert_eq!(entry.timestamp, 1_000);
        assert_eq!(entry.expires, 61_000);
        assert!(entry.expires >= entry.timestamp);
        assert!(!entry.is_persistent());
    }

    #[test]
    fn test_entry_expiration_boundary() {
        let entry = CacheEntry::new(json!(42), 0, Duration::from_millis(1000));

        assert!(!entry.is_expired_at(999));
        assert!(entry.is_expired_at(1000));
        assert!(entry.is_expired_at(1500));
    }

    #[test]
    fn test_time_until_expiration() {
        let entry = CacheEntry::new(json!("x"), 0, Duration::from_millis(1000));

        assert_eq!(entry.time_until_expiration(400), Some(Duration::from_millis(600)));
        assert_eq!(entry.time_until_expiration(1000), None);
        assert_eq!(entry.age(250), Duration::from_millis(250));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let entry = CacheEntry::new(json!(null), i64::MAX - 5, Duration::from_secs(u64::MAX));
        assert_eq!(entry.expires, i64::MAX);
    }

    #[test]
    fn test_blob_layout() {
        let mut entry = CacheEntry::new(json!([1, 2]), 5, Duration::from_millis(10));
        entry.persist = true;

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value, json!({"data": [1, 2], "timestamp": 5, "expires": 15}));

        let parsed: CacheEntry = serde_json::from_value(value).unwrap();
        assert!(!parsed.is_persistent());
    }
}
