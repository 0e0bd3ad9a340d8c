//! # Leasekeeper
//! Leaderless, lease-based partition ownership for Rust services.
//!
//! A fixed set of work partitions (queue shards, table ranges, ...) is spread
//! over a dynamic pool of worker processes. Workers coordinate only through
//! optimistic-concurrency writes to a shared lease table: they claim unowned
//! or expired partitions, renew what they own, steal toward a fair share when
//! others hold too much, and drain and release gracefully on shutdown.
//!
//! # Goals
//! - Easy to understand code
//! - No leader, lock service or consensus round: only conditional writes
//! - Crash tolerance through lease expiry
//! - Be a building block for partitioned consumers
//!
//! ## Getting started
//! Implement [`PartitionListener`](cluster::PartitionListener) to start and
//! stop work on partitions, plug in a [`LeaseStore`](cluster::LeaseStore), and
//! run a [`PartitionManager`](cluster::PartitionManager) per worker.
//!
//! ```rust,no_run
//! use leasekeeper::prelude::*;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Consumers;
//!
//! #[async_trait]
//! impl PartitionListener for Consumers {
//!     async fn on_lease_acquired(&self, partition_id: &str) {
//!         println!("start {partition_id}");
//!     }
//!
//!     async fn on_drain_requested(&self, partition_id: &str, _reason: DrainReason) {
//!         println!("stop {partition_id}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryLeaseStore::new());
//!     let manager = PartitionManager::new(
//!         PartitionManagerConfig::for_worker("worker-1"),
//!         store,
//!         Arc::new(Consumers),
//!     )?;
//!     manager.create_lease_store().await?;
//!     manager.create_leases(["orders-0", "orders-1"]).await?;
//!     manager.start().await?;
//!     manager.stop().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod cluster;
pub mod constants;
pub mod telemetry;

pub mod prelude {
    //! Main export of lease protocol structures
    //!
    //! ```rust,no_run
    //! use leasekeeper::prelude::*;
    //! ```
    pub use crate::cluster::{
        DrainReason, InMemoryLeaseStore, Lease, LeaseError, LeaseEvent, LeaseEventKind,
        LeaseResult, LeaseStore, NoopListener, PartitionListener, PartitionManager,
        PartitionManagerConfig,
    };
}
