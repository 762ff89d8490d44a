//! # Network Monitor
//!
//! Single view of connectivity shared by the whole app:
//!
//! - **Link samples** arrive from a [`ConnectivitySource`] (platform bridge)
//! - **Reachability probes** run every minute, and right after the link comes
//!   back, under a timeout with retries for transient failures
//! - **Listeners** receive the current state on registration and every change
//!   afterwards; reconnection listeners and [`NetworkMonitor::execute_when_online`]
//!   build on them
//!
//! The last status is persisted so the next start has an initial guess.

pub mod listeners;
pub mod monitor;
pub mod probe;
pub mod source;
pub mod status;

pub use listeners::{ListenerHandle, ListenerRegistry, StatusListener};
pub use monitor::{NetworkMonitor, NetworkMonitorConfig, DEFAULT_STATUS_STORAGE_KEY};
pub use probe::{
    run_probe, FnProbe, ProbeConfig, ProbeOutcome, ProbeResult, ReachabilityProbe,
    TcpReachabilityProbe,
};
pub use source::{ConnectivitySource, ManualConnectivity};
pub use status::{ConnectionState, ConnectivitySnapshot, NetworkStatus};
