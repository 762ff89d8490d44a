//! Error types for the offline layer
//!
//! Background maintenance (cleanup, flush, probe, replay) never surfaces these
//! to callers; they are logged instead. They are returned from explicit calls
//! with a natural failure mode such as configuration parsing or serializing a
//! caller's value.

use thiserror::Error;

/// Main error type for cache, network and sync operations
#[derive(Error, Debug)]
pub enum OfflineError {
    /// Durable storage read/write failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error from a file-backed store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid key pattern passed to `clear_pattern`
    #[error("Invalid key pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },

    /// Reachability probe failure
    #[error("Probe error: {0}")]
    Probe(String),

    /// Sync batch failure
    #[error("Sync error: {0}")]
    Sync(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for offline operations
pub type Result<T> = std::result::Result<T, OfflineError>;

impl From<String> for OfflineError {
    fn from(s: String) -> Self {
        OfflineError::Other(s)
    }
}

impl From<&str> for OfflineError {
    fn from(s: &str) -> Self {
        OfflineError::Other(s.to_string())
    }
}

impl OfflineError {
    /// Build a timeout error from a duration
    pub fn timeout(timeout: std::time::Duration, context: impl Into<String>) -> Self {
        OfflineError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
            context: context.into(),
        }
    }
}
