//! Hooks into the surrounding service.
//!
//! The lease protocol decides *who* processes a partition; the service that
//! embeds it does the processing. [`PartitionListener`] is the seam between
//! the two: it is told when processing should start and asked to stop.

use async_trait::async_trait;

use super::drain_registry::DrainReason;

/// Callbacks invoked by the coordination loop.
///
/// # Implementing
///
/// `on_drain_requested` runs in a spawned task and the lease is held (and
/// renewed) until it returns, so it should return only once the partition is
/// no longer being processed. It should not hold the partition for longer
/// than the stuck-lease threshold or another worker will take it anyway.
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use leasekeeper::cluster::{DrainReason, PartitionListener};
///
/// struct Consumers;
///
/// #[async_trait]
/// impl PartitionListener for Consumers {
///     async fn on_lease_acquired(&self, partition_id: &str) {
///         println!("start consuming {partition_id}");
///     }
///
///     async fn on_drain_requested(&self, partition_id: &str, reason: DrainReason) {
///         println!("stop consuming {partition_id} ({reason})");
///     }
/// }
/// ```
#[async_trait]
pub trait PartitionListener: Send + Sync + 'static {
    /// The worker now owns `partition_id` and should start processing it.
    async fn on_lease_acquired(&self, partition_id: &str);

    /// Stop processing `partition_id`; the lease is released after return.
    async fn on_drain_requested(&self, partition_id: &str, reason: DrainReason);
}

/// Listener that does nothing. Drains complete immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

#[async_trait]
impl PartitionListener for NoopListener {
    async fn on_lease_acquired(&self, _partition_id: &str) {}

    async fn on_drain_requested(&self, _partition_id: &str, _reason: DrainReason) {}
}
