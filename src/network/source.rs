//! Platform connectivity source
//!
//! The platform layer (a mobile bridge, an OS netlink watcher, a test) pushes
//! link-level samples into the monitor through this trait.

use crate::error::Result;
use crate::network::status::ConnectivitySnapshot;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Source of link-level connectivity samples
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// Subscribe to connectivity changes. The receiver yields the current
    /// sample first, then one sample per platform event.
    fn subscribe(&self) -> UnboundedReceiver<ConnectivitySnapshot>;

    /// One-shot read of the current sample
    async fn fetch(&self) -> Result<ConnectivitySnapshot>;
}

/// Connectivity source driven by explicit calls
///
/// Platform bridges call [`set`](Self::set) from their own change callbacks;
/// tests use it to script connectivity transitions.
#[derive(Debug)]
pub struct ManualConnectivity {
    current: Mutex<ConnectivitySnapshot>,
    subscribers: Mutex<Vec<UnboundedSender<ConnectivitySnapshot>>>,
}

impl ManualConnectivity {
    pub fn new(initial: ConnectivitySnapshot) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(initial),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Record a new sample and deliver it to every live subscriber
    pub fn set(&self, snapshot: ConnectivitySnapshot) {
        *self.current.lock() = snapshot;

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(snapshot).is_ok());
        debug!(
            "Connectivity sample {:?} delivered to {} subscribers",
            snapshot,
            subscribers.len()
        );
    }

    pub fn set_online(&self) {
        self.set(ConnectivitySnapshot::online());
    }

    pub fn set_offline(&self) {
        self.set(ConnectivitySnapshot::offline());
    }

    pub fn set_limited(&self) {
        self.set(ConnectivitySnapshot::limited());
    }

    pub fn current(&self) -> ConnectivitySnapshot {
        *self.current.lock()
    }

    /// Number of subscribers whose receivers are still open
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

#[async_trait]
impl ConnectivitySource for ManualConnectivity {
    fn subscribe(&self) -> UnboundedReceiver<ConnectivitySnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Cannot fail: the receiver is still in scope
        let _ = tx.send(self.current());
        self.subscribers.lock().push(tx);
        rx
    }

    async fn fetch(&self) -> Result<ConnectivitySnapshot> {
        Ok(self.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_replays_current() {
        let source = ManualConnectivity::new(ConnectivitySnapshot::offline());
        let mut rx = source.subscribe();

        assert_eq!(rx.recv().await, Some(ConnectivitySnapshot::offline()));

        source.set_online();
        assert_eq!(rx.recv().await, Some(ConnectivitySnapshot::online()));
        assert_eq!(source.fetch().await.unwrap(), ConnectivitySnapshot::online());
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_dropped() {
        let source = ManualConnectivity::new(ConnectivitySnapshot::online());
        let rx = source.subscribe();
        let _rx2 = source.subscribe();
        assert_eq!(source.subscriber_count(), 2);

        drop(rx);
        source.set_limited();
        assert_eq!(source.subscriber_count(), 1);
        assert_eq!(source.current(), ConnectivitySnapshot::limited());
    }
}
