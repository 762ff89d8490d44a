//! Active reachability probing
//!
//! Link-level connectivity does not prove the backend is reachable (captive
//! portals, dead uplinks). The monitor periodically runs a
//! [`ReachabilityProbe`] under a timeout, with retries for transient
//! failures and slow-response detection.

use crate::error::{OfflineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Configuration for reachability probing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Whether the periodic probe runs at all
    pub enabled: bool,
    /// Delay between scheduled probes, restarted after every probe
    pub interval: Duration,
    /// Timeout for a single probe attempt
    pub timeout: Duration,
    /// Whether to retry probes that error or time out
    pub enable_retries: bool,
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Delay between retry attempts
    pub retry_delay: Duration,
    /// Response time above which a reachable backend counts as degraded
    pub degraded_threshold_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
            enable_retries: true,
            max_retries: 1,
            retry_delay: Duration::from_millis(500),
            degraded_threshold_ms: 2000,
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.interval.is_zero() {
            return Err("probe interval must be greater than 0".to_string());
        }
        if self.timeout.is_zero() {
            return Err("probe timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Backend reachability check
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// `Ok(false)` means the backend answered "unreachable"; errors are
    /// treated as unreachable by the monitor as well
    async fn check_reachability(&self) -> Result<bool>;
}

/// Probe that opens a TCP connection to the backend host
#[derive(Debug, Clone)]
pub struct TcpReachabilityProbe {
    address: String,
}

impl TcpReachabilityProbe {
    /// `address` is `host:port`, e.g. `firestore.googleapis.com:443`
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl ReachabilityProbe for TcpReachabilityProbe {
    async fn check_reachability(&self) -> Result<bool> {
        match TcpStream::connect(&self.address).await {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!("TCP probe to {} failed: {}", self.address, e);
                Ok(false)
            }
        }
    }
}

/// Probe backed by an async closure
pub struct FnProbe<F> {
    check: F,
}

impl<F, Fut> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send,
{
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F, Fut> ReachabilityProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send,
{
    async fn check_reachability(&self) -> Result<bool> {
        (self.check)()
            .await
            .map_err(|e| OfflineError::Probe(e.to_string()))
    }
}

/// Probe outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeOutcome {
    /// Backend reachable and responsive
    Reachable,
    /// Backend reachable but slower than the degraded threshold
    Degraded,
    /// Backend answered unreachable, or the probe failed
    Unreachable,
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable | ProbeOutcome::Degraded)
    }
}

/// Result of one probe run (including retries)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub outcome: ProbeOutcome,
    /// Response time of the last attempt in milliseconds
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Error of the last attempt, when it failed rather than answered
    pub error: Option<String>,
    /// Number of retry attempts made
    pub retry_count: u32,
}

impl ProbeResult {
    fn answered(reachable: bool, response_time: Duration, degraded_threshold_ms: u64) -> Self {
        let response_time_ms = response_time.as_millis() as u64;
        let outcome = match reachable {
            true if response_time_ms > degraded_threshold_ms => ProbeOutcome::Degraded,
            true => ProbeOutcome::Reachable,
            false => ProbeOutcome::Unreachable,
        };

        Self {
            outcome,
            response_time_ms,
            timestamp: Utc::now(),
            error: None,
            retry_count: 0,
        }
    }

    fn failed(response_time: Duration, error: &OfflineError) -> Self {
        Self {
            outcome: ProbeOutcome::Unreachable,
            response_time_ms: response_time.as_millis() as u64,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
            retry_count: 0,
        }
    }

    fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn is_reachable(&self) -> bool {
        self.outcome.is_reachable()
    }
}

/// Run one probe attempt under the configured timeout
async fn probe_once(probe: &dyn ReachabilityProbe, config: &ProbeConfig) -> Result<bool> {
    match tokio::time::timeout(config.timeout, probe.check_reachability()).await {
        Ok(result) => result,
        Err(_) => Err(OfflineError::timeout(config.timeout, "reachability probe")),
    }
}

/// Execute a probe with retry logic
///
/// Only failures (errors and timeouts) are retried; a clean "unreachable"
/// answer is returned as is.
pub async fn run_probe(probe: &dyn ReachabilityProbe, config: &ProbeConfig) -> ProbeResult {
    let max_retries = if config.enable_retries {
        config.max_retries
    } else {
        0
    };
    let mut retry_count = 0;

    loop {
        let start = Instant::now();
        match probe_once(probe, config).await {
            Ok(reachable) => {
                debug!("Reachability probe answered {} in {:?}", reachable, start.elapsed());
                return ProbeResult::answered(reachable, start.elapsed(), config.degraded_threshold_ms)
                    .with_retries(retry_count);
            }
            Err(e) if retry_count >= max_retries => {
                warn!("Reachability probe failed: {}", e);
                return ProbeResult::failed(start.elapsed(), &e).with_retries(retry_count);
            }
            Err(e) => {
                retry_count += 1;
                warn!(
                    "Reachability probe failed (attempt {}/{}), retrying after {:?}: {}",
                    retry_count,
                    max_retries + 1,
                    config.retry_delay,
                    e
                );
                tokio::time::sleep(config.retry_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_default_probe_config() {
        let config = ProbeConfig::default();

        assert!(config.enabled);
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.enable_retries);
        assert!(config.validate().is_ok());

        let invalid = ProbeConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_probe_result_degraded() {
        let result = ProbeResult::answered(true, Duration::from_millis(2500), 2000);
        assert_eq!(result.outcome, ProbeOutcome::Degraded);
        assert!(result.is_reachable());

        let result = ProbeResult::answered(true, Duration::from_millis(50), 2000);
        assert_eq!(result.outcome, ProbeOutcome::Reachable);

        let result = ProbeResult::answered(false, Duration::from_millis(50), 2000);
        assert_eq!(result.outcome, ProbeOutcome::Unreachable);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_fn_probe() {
        let probe = FnProbe::new(|| async { Ok(true) });
        assert!(probe.check_reachability().await.unwrap());

        let failing = FnProbe::new(|| async { Err::<bool, _>(anyhow::anyhow!("dns failure")) });
        assert!(matches!(
            failing.check_reachability().await,
            Err(OfflineError::Probe(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_probe_retries_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let probe = FnProbe::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    anyhow::bail!("transient")
                }
                Ok(true)
            }
        });

        let result = run_probe(&probe, &ProbeConfig::default()).await;
        assert!(result.is_reachable());
        assert_eq!(result.retry_count, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_probe_times_out() {
        let probe = FnProbe::new(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        });
        let config = ProbeConfig {
            enable_retries: false,
            ..Default::default()
        };

        let result = run_probe(&probe, &config).await;
        assert_eq!(result.outcome, ProbeOutcome::Unreachable);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_answer_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let probe = FnProbe::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        });

        let result = run_probe(&probe, &ProbeConfig::default()).await;
        assert_eq!(result.outcome, ProbeOutcome::Unreachable);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = TcpReachabilityProbe::new(addr.to_string());
        assert_eq!(probe.address(), addr.to_string());
        assert!(!probe.check_reachability().await.unwrap());
    }

    #[tokio::test]
    async fn test_tcp_probe_reachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = TcpReachabilityProbe::new(addr.to_string());
        assert!(probe.check_reachability().await.unwrap());
    }
}
