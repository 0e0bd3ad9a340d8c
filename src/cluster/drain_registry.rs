//! Registry of in-flight partition drains.
//!
//! A drain is the graceful stop of work on one partition. The surrounding
//! service performs it asynchronously; this registry keeps the handle of the
//! spawned drain so the coordination loop can poll its completion without
//! blocking, and guarantees at most one live drain per partition.
//!
//! # Example
//!
//! ```rust,no_run
//! use leasekeeper::cluster::drain_registry::{DrainReason, DrainRegistry, DrainStatus};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut registry = DrainRegistry::new();
//!
//!     let spawned = registry.start("p-0", DrainReason::LeaseLost, async {
//!         // stop consuming partition p-0
//!         tokio::time::sleep(Duration::from_millis(50)).await;
//!     });
//!     assert!(spawned);
//!
//!     // A second request for the same partition reuses the first drain.
//!     assert!(!registry.start("p-0", DrainReason::LeaseLost, async {}));
//!
//!     while registry.status("p-0") == DrainStatus::Running {
//!         tokio::time::sleep(Duration::from_millis(10)).await;
//!     }
//!     registry.remove("p-0");
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;

/// Why a partition is being drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainReason {
    /// Another worker was designated as the next owner.
    LeaseLost,
    /// This worker is shutting down.
    Shutdown,
}

impl DrainReason {
    /// Returns a string label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainReason::LeaseLost => "lease_lost",
            DrainReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for DrainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion state of a partition's drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// No drain registered for the partition.
    Idle,
    /// A drain is in flight.
    Running,
    /// The registered drain has finished.
    Completed,
}

impl DrainStatus {
    /// True when nothing is still processing the partition in this process.
    pub fn is_drained(&self) -> bool {
        !matches!(self, DrainStatus::Running)
    }
}

/// A registered drain.
struct DrainTask {
    handle: JoinHandle<()>,
    reason: DrainReason,
    started_at: Instant,
}

/// Tracks at most one drain per partition.
#[derive(Default)]
pub struct DrainRegistry {
    tasks: HashMap<Arc<str>, DrainTask>,
}

impl DrainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `drain` for `partition_id` unless a drain is already registered.
    ///
    /// Returns true if a new drain was spawned. A finished drain still counts
    /// as registered until [`remove`](Self::remove) is called, so callers see
    /// its completion exactly once.
    pub fn start<F>(&mut self, partition_id: &str, reason: DrainReason, drain: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(existing) = self.tasks.get(partition_id) {
            tracing::debug!(
                partition_id,
                reason = %reason,
                existing_reason = %existing.reason,
                "Drain already registered, reusing"
            );
            return false;
        }

        let handle = tokio::spawn(drain);
        self.tasks.insert(
            Arc::from(partition_id),
            DrainTask {
                handle,
                reason,
                started_at: Instant::now(),
            },
        );
        tracing::debug!(partition_id, reason = %reason, "Spawned drain");
        true
    }

    /// Non-blocking completion check.
    pub fn status(&self, partition_id: &str) -> DrainStatus {
        match self.tasks.get(partition_id) {
            None => DrainStatus::Idle,
            Some(task) if task.handle.is_finished() => DrainStatus::Completed,
            Some(_) => DrainStatus::Running,
        }
    }

    /// Forget a partition's drain. Returns how long it was registered.
    ///
    /// A drain that is still running is detached, never aborted.
    pub fn remove(&mut self, partition_id: &str) -> Option<Duration> {
        self.tasks
            .remove(partition_id)
            .map(|task| task.started_at.elapsed())
    }

    /// Forget a partition's drain only if it has finished.
    pub fn remove_finished(&mut self, partition_id: &str) -> bool {
        if self.status(partition_id) == DrainStatus::Completed {
            self.tasks.remove(partition_id);
            return true;
        }
        false
    }

    /// Reason of the registered drain, if any.
    pub fn reason(&self, partition_id: &str) -> Option<DrainReason> {
        self.tasks.get(partition_id).map(|task| task.reason)
    }

    /// Number of registered drains, finished or not.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of drains still running.
    pub fn running_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|task| !task.handle.is_finished())
            .count()
    }

    /// Wait for every registered drain to finish, then clear the registry.
    pub async fn wait_all(&mut self) {
        for (partition_id, task) in self.tasks.drain() {
            if let Err(e) = task.handle.await {
                tracing::warn!(partition_id = &*partition_id, error = %e, "Drain task failed");
            }
        }
    }
}

impl fmt::Debug for DrainRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrainRegistry")
            .field("registered", &self.tasks.len())
            .field("running", &self.running_count())
            .finish()
    }
}
