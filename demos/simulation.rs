//! Simulated cluster of workers sharing one in-memory lease table.
//!
//! Workers join one after another, one leaves gracefully and one crashes.
//! After each phase the lease table is printed as JSON.
//!
//! Run with: `cargo run --example simulation`
//! Use `RUST_LOG=leasekeeper=debug` to watch every lease write, and
//! `LOG_FORMAT=json` for structured output.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leasekeeper::cluster::{
    DrainReason, InMemoryLeaseStore, PartitionListener, PartitionManager, PartitionManagerConfig,
};
use leasekeeper::telemetry::{LogFormat, init_logging};
use tracing::info;

const PARTITIONS: usize = 12;

type DemoResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Pretends to consume a partition; draining takes a moment.
struct Consumer {
    worker: String,
}

#[async_trait]
impl PartitionListener for Consumer {
    async fn on_lease_acquired(&self, partition_id: &str) {
        info!(worker = %self.worker, partition_id, "Consuming partition");
    }

    async fn on_drain_requested(&self, partition_id: &str, reason: DrainReason) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!(worker = %self.worker, partition_id, %reason, "Flushed partition");
    }
}

fn config(worker: &str) -> PartitionManagerConfig {
    PartitionManagerConfig {
        worker_id: worker.to_string(),
        own_epoch: Duration::from_secs(2),
        lease_duration: Duration::from_secs(1),
        lease_renew_interval: Duration::from_millis(200),
        release_poll_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

fn worker(name: &str, store: &Arc<InMemoryLeaseStore>) -> DemoResult<PartitionManager> {
    let listener = Arc::new(Consumer {
        worker: name.to_string(),
    });
    Ok(PartitionManager::new(config(name), store.clone(), listener)?)
}

async fn print_table(phase: &str, observer: &PartitionManager) -> DemoResult<()> {
    let leases = observer.list_leases().await?;
    println!("=== {phase} ===");
    println!("{}", serde_json::to_string_pretty(&leases)?);
    Ok(())
}

#[tokio::main]
async fn main() -> DemoResult<()> {
    init_logging(LogFormat::from_env()).map_err(|e| e as Box<dyn std::error::Error>)?;

    let store = Arc::new(InMemoryLeaseStore::new());
    let a = worker("worker-a", &store)?;
    a.create_lease_store().await?;
    a.create_leases((0..PARTITIONS).map(|i| format!("orders-{i}"))).await?;

    // Forward every lease event from worker A to the log.
    let mut events = a.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(
                event = %serde_json::to_string(&event).unwrap_or_default(),
                "Lease event"
            );
        }
    });

    a.start().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    print_table("one worker", &a).await?;

    let b = worker("worker-b", &store)?;
    let c = worker("worker-c", &store)?;
    b.start().await?;
    c.start().await?;
    tokio::time::sleep(Duration::from_secs(3)).await;
    print_table("three workers", &a).await?;

    // Graceful leave: A drains and hands everything back.
    a.stop().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    print_table("worker-a left", &b).await?;

    // Crash: C's leases sit until they expire, then B reclaims them.
    c.abandon().await;
    tokio::time::sleep(Duration::from_secs(4)).await;
    print_table("worker-c crashed", &b).await?;

    for description in b.describe_leases().await? {
        info!(
            partition_id = description.lease.partition_id(),
            view = %description.view,
            expired = description.expired,
            "Final lease state"
        );
    }
    info!(owned = ?b.owned_partitions(), "worker-b holdings");

    b.stop().await?;
    Ok(())
}
