//! Backend side of the sync queue

use crate::sync::operation::SyncOperation;
use async_trait::async_trait;
use std::future::Future;

/// Applies a batch of queued operations to the backend
///
/// The whole batch succeeds or fails together; on failure it is retried on
/// the next trigger. Implementations needing per-operation retry handle it
/// internally.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn sync(&self, operations: &[SyncOperation]) -> anyhow::Result<()>;
}

/// Handler backed by an async closure receiving an owned copy of the batch
pub struct FnSyncHandler<F> {
    apply: F,
}

impl<F, Fut> FnSyncHandler<F>
where
    F: Fn(Vec<SyncOperation>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    pub fn new(apply: F) -> Self {
        Self { apply }
    }
}

#[async_trait]
impl<F, Fut> SyncHandler for FnSyncHandler<F>
where
    F: Fn(Vec<SyncOperation>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn sync(&self, operations: &[SyncOperation]) -> anyhow::Result<()> {
        (self.apply)(operations.to_vec()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::operation::NewOperation;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_handler_receives_batch() {
        let handler = FnSyncHandler::new(|ops: Vec<SyncOperation>| async move {
            anyhow::ensure!(ops.len() == 2, "unexpected batch size {}", ops.len());
            Ok(())
        });

        let batch = vec![
            NewOperation::create("workouts", json!({})).into_operation(1),
            NewOperation::update("workouts", json!({})).into_operation(2),
        ];

        assert!(handler.sync(&batch).await.is_ok());
        assert!(handler.sync(&batch[..1]).await.is_err());
    }
}
