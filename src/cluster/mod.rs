//! Lease-based partition ownership.
//!
//! A fixed set of partitions is spread across a dynamic pool of workers. Each
//! partition has one versioned [`Lease`] in a shared [`LeaseStore`]; workers
//! coordinate only through conditional writes on those leases. There is no
//! leader, no lock service and no consensus round: crashed workers are
//! detected purely by lease expiry.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────┐      ┌──────────┐      ┌──────────┐
//!   │ Worker A │      │ Worker B │      │ Worker C │
//!   │  (loop)  │      │  (loop)  │      │  (loop)  │
//!   └────┬─────┘      └────┬─────┘      └────┬─────┘
//!        │  list_all / conditional_update    │
//!        └─────────────────┼─────────────────┘
//!                          ▼
//!                 ┌─────────────────┐
//!                 │   Lease Store   │  one versioned row per partition
//!                 └─────────────────┘
//! ```
//!
//! Per worker, leaves first:
//!
//! - [`lease`]: the record and its pure transforms
//! - [`store`]: the optimistic-concurrency contract, with [`memory_store`]
//!   as an in-process implementation
//! - [`lease_state`]: per-lease classification into claim, renew, steal,
//!   drain and release
//! - [`rebalancer`]: greedy fair-share stealing
//! - [`drain_registry`]: at most one in-flight drain per partition
//! - [`lease_coordinator`]: one tick, read-classify-write
//! - [`PartitionManager`]: the loop, shutdown, and administrative operations
//!
//! # Guarantees
//!
//! - **Convergence**: with no crashes, every lease ends up with exactly one
//!   owner and no pending successor.
//! - **Conflict safety**: a stale write never lands; the loser re-reads.
//! - **Best-effort exclusivity**: two workers may both process a partition
//!   briefly during a handoff, never in steady state.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use leasekeeper::cluster::{
//!     InMemoryLeaseStore, NoopListener, PartitionManager, PartitionManagerConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PartitionManagerConfig::from_env()?;
//!     let store = Arc::new(InMemoryLeaseStore::new());
//!     let manager = PartitionManager::new(config, store, Arc::new(NoopListener))?;
//!     manager.create_lease_store().await?;
//!     manager.create_leases((0..16).map(|i| format!("p-{i}"))).await?;
//!     manager.start().await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     manager.stop().await?;
//!     Ok(())
//! }
//! ```

mod config;
pub mod drain_registry;
mod error;
pub mod events;
pub mod lease;
pub mod lease_coordinator;
pub mod lease_state;
mod listener;
pub mod memory_store;
pub mod metrics;
mod partition_manager;
pub mod rebalancer;
pub mod retry;
pub mod store;

pub use config::PartitionManagerConfig;
pub use drain_registry::{DrainReason, DrainRegistry, DrainStatus};
pub use error::{LeaseError, LeaseResult};
pub use events::{LeaseEvent, LeaseEventKind};
pub use lease::{Lease, VersionToken, WorkerId};
pub use lease_coordinator::{LeaseCoordinator, ShutdownProgress, TickOutcome};
pub use lease_state::{LeaseTimings, LeaseView};
pub use listener::{NoopListener, PartitionListener};
pub use memory_store::InMemoryLeaseStore;
pub use partition_manager::{LeaseDescription, PartitionManager};
pub use store::{InsertOutcome, LeaseStore, WriteOutcome};
