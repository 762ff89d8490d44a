//! # Sync Queue
//!
//! Mutations made while offline are queued durably and replayed in FIFO
//! order as a single batch through a [`SyncHandler`] once the backend is
//! reachable. Delivery is at-least-once: a failed batch is retried whole on
//! the next trigger, so handlers must apply operations idempotently.
//!
//! ## Example
//!
//! ```rust
//! use gymtrack_offline::storage::MemoryStorage;
//! use gymtrack_offline::sync::{FnSyncHandler, NewOperation, SyncConfig, SyncOperation, SyncQueue};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let handler = FnSyncHandler::new(|ops: Vec<SyncOperation>| async move {
//!     println!("applying {} operations", ops.len());
//!     Ok(())
//! });
//! let queue = SyncQueue::new(SyncConfig::default(), Arc::new(MemoryStorage::new()), Arc::new(handler));
//!
//! queue
//!     .add_operation(NewOperation::create("weightLog", json!({ "kg": 81.4 })))
//!     .await;
//! assert_eq!(queue.pending_count(), 0);
//! # }
//! ```

pub mod config;
pub mod handler;
pub mod operation;
pub mod queue;

pub use config::{SyncConfig, DEFAULT_PENDING_STORAGE_KEY};
pub use handler::{FnSyncHandler, SyncHandler};
pub use operation::{NewOperation, OperationType, SyncOperation};
pub use queue::{SyncQueue, SyncState};
