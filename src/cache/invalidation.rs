//! Invalidation reasons and events
//!
//! Every removal path of the cache (TTL sweep, explicit removal, dependency
//! cascade, pattern clear, post-sync refresh) is reported with a reason so the
//! sweep and the sync queue can log what they dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry expired based on TTL
    Expired,

    /// Manual invalidation by key
    Manual,

    /// Removed because a dependency key was removed
    Dependency { root: String },

    /// Key matched a pattern passed to `clear_pattern`
    PatternMatch { pattern: String },

    /// Whole cache wiped
    Cleared,

    /// Collection changed remotely after a sync batch
    SyncApplied { collection: String },
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::Dependency { root } => {
                write!(f, "dependency removed: {}", root)
            }
            InvalidationReason::PatternMatch { pattern } => {
                write!(f, "pattern match: {}", pattern)
            }
            InvalidationReason::Cleared => write!(f, "cache cleared"),
            InvalidationReason::SyncApplied { collection } => {
                write!(f, "sync applied to collection: {}", collection)
            }
        }
    }
}

/// Event describing a batch of invalidated keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were invalidated
    pub keys: Vec<String>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<String>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
