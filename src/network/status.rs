//! Connectivity status types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Last known connectivity, as exposed to listeners and persisted across
/// restarts as `{ isConnected, isInternetReachable, lastChecked }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Link-level connectivity (wifi/cellular up)
    pub is_connected: bool,

    /// The backend answered the last reachability check
    pub is_internet_reachable: bool,

    /// When either flag was last sampled
    pub last_checked: DateTime<Utc>,
}

impl NetworkStatus {
    /// Status before any sample: both flags down
    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: false,
            last_checked: Utc::now(),
        }
    }

    /// Connected and reachable
    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable
    }

    /// Whether the connectivity flags differ, ignoring the timestamp
    pub fn differs_from(&self, other: &NetworkStatus) -> bool {
        self.is_connected != other.is_connected
            || self.is_internet_reachable != other.is_internet_reachable
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// One sample from the platform connectivity source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivitySnapshot {
    pub is_connected: bool,
    pub is_internet_reachable: bool,
}

impl ConnectivitySnapshot {
    pub fn online() -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: true,
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: false,
        }
    }

    /// Link up but the internet is not reachable (captive portal, dead uplink)
    pub fn limited() -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: false,
        }
    }

    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable
    }
}

/// Coarse connection state derived from [`NetworkStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No sample received yet
    Unknown,
    Online,
    Offline,
    /// Link up, backend not reachable
    LimitedConnectivity,
}

impl ConnectionState {
    pub fn from_status(status: &NetworkStatus) -> Self {
        match (status.is_connected, status.is_internet_reachable) {
            (true, true) => ConnectionState::Online,
            (true, false) => ConnectionState::LimitedConnectivity,
            // Reachable without a link is not well formed; treat as offline
            (false, _) => ConnectionState::Offline,
        }
    }

    /// Whether queued work may be sent
    pub fn can_sync(&self) -> bool {
        matches!(self, ConnectionState::Online)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unknown => write!(f, "unknown"),
            ConnectionState::Online => write!(f, "online"),
            ConnectionState::Offline => write!(f, "offline"),
            ConnectionState::LimitedConnectivity => write!(f, "limited_connectivity"),
        }
    }
}
