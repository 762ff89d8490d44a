//! Status listener registry

use crate::network::status::NetworkStatus;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error};

/// Callback invoked with every status change
pub type StatusListener = Arc<dyn Fn(&NetworkStatus) + Send + Sync>;

/// Ordered set of status listeners
///
/// Listeners run in registration order, outside the registry lock, so a
/// listener may add or remove listeners while being notified.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<(u64, StatusListener)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and return its id
    pub fn insert(&self, listener: StatusListener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        id
    }

    /// Unregister a listener. Returns false when it was already gone.
    pub fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Call every listener with `status`. A panicking listener is logged
    /// and the remaining listeners still run.
    pub fn notify(&self, status: &NetworkStatus) {
        let snapshot: Vec<(u64, StatusListener)> = self.listeners.lock().clone();
        debug!("Notifying {} network listeners", snapshot.len());

        for (id, listener) in snapshot {
            invoke(id, &listener, status);
        }
    }
}

/// Run one listener, catching panics
pub(crate) fn invoke(id: u64, listener: &StatusListener, status: &NetworkStatus) {
    if catch_unwind(AssertUnwindSafe(|| listener(status))).is_err() {
        error!("Network listener {} panicked", id);
    }
}

/// Handle returned when registering a listener
///
/// Dropping the handle keeps the listener registered; call
/// [`remove`](Self::remove) to unsubscribe.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl ListenerHandle {
    pub(crate) fn new(id: u64, registry: &Arc<ListenerRegistry>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unsubscribe. Safe to call more than once.
    pub fn remove(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.id),
            None => false,
        }
    }
}
