//! Offline Sync Demo
//!
//! Walks through a workout logged while offline: the write lands in the
//! cache and the sync queue, connectivity returns, the queue is replayed and
//! the stale cached list is invalidated.
//!
//! Usage:
//!   cargo run --example offline_sync_demo
//!
//! Environment variables (all optional, see `OfflineConfig::from_env`):
//!   GYMTRACK_CACHE_TTL_SECS    - default cache TTL
//!   GYMTRACK_SYNC_TIMEOUT_SECS - upper bound for one sync batch
//!   RUST_LOG                   - log filter (default: gymtrack_offline=info)

use gymtrack_offline::{
    Collection, ConnectivitySnapshot, FileStorage, FnProbe, FnSyncHandler, ManualConnectivity,
    NewOperation, OfflineConfig, OfflineRuntime, SyncOperation,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gymtrack_offline=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== GymTrack Offline Sync Demo ===");

    let data_dir = demo_data_dir()?;
    info!("Storing offline data in {}", data_dir.display());

    let source = ManualConnectivity::new(ConnectivitySnapshot::offline());
    let handler = FnSyncHandler::new(|ops: Vec<SyncOperation>| async move {
        for op in &ops {
            info!("  -> {} {} {}", op.op_type, op.collection, op.data);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    });

    let runtime = OfflineRuntime::start_with(
        OfflineConfig::from_env()?,
        Arc::new(FileStorage::new(&data_dir)),
        source.clone(),
        Arc::new(FnProbe::new(|| async { Ok(true) })),
        Arc::new(handler),
        gymtrack_offline::clock::system_clock(),
    )
    .await?;

    let monitor = runtime.monitor().clone();
    let _status = monitor.add_listener(|status| {
        info!(
            "Status listener: connected={}, reachable={}",
            status.is_connected, status.is_internet_reachable
        );
    });

    info!("\n--- Logging a workout while offline ---");
    let workouts = runtime.collections();
    workouts
        .store_documents(
            &Collection::Workouts,
            "user-1",
            &[json!({ "name": "Leg day", "sets": 12 })],
        )
        .await?;

    let id = runtime
        .sync_queue()
        .add_operation(NewOperation::create(
            "workouts",
            json!({ "name": "Leg day", "sets": 12 }),
        ))
        .await;
    info!(
        "Queued operation {} ({} pending)",
        id,
        runtime.sync_queue().pending_count()
    );

    let monitor_for_task = monitor.clone();
    let deferred = tokio::spawn(async move {
        monitor_for_task
            .execute_when_online(|| async { Ok("profile photo uploaded") }, "upload photo")
            .await
    });

    info!("\n--- Connectivity returns ---");
    source.set_online();

    let mut state = runtime.sync_queue().subscribe();
    while state.borrow_and_update().pending_count() > 0 {
        state.changed().await?;
    }
    info!(
        "Sync finished, last synced at {:?}",
        runtime.sync_queue().last_synced()
    );

    if let Some(message) = deferred.await? {
        info!("Deferred task: {}", message);
    }

    let cached = workouts
        .get_documents::<serde_json::Value>(&Collection::Workouts, "user-1")
        .await;
    info!("Cached workouts after sync: {:?}", cached);
    info!("Cache stats: {}", runtime.cache().get_stats().await);

    runtime.shutdown().await;
    info!("\n=== Demo Complete ===");
    Ok(())
}

fn demo_data_dir() -> anyhow::Result<std::path::PathBuf> {
    let dir = std::env::temp_dir().join(format!("gymtrack-demo-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
