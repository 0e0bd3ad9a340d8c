//! One worker's side of the lease protocol, one tick at a time.
//!
//! A [`LeaseCoordinator`] owns everything a worker needs between ticks: its
//! identity, the store handle, the drain registry and the set of partitions
//! it has announced to its [`PartitionListener`]. It has no timer of its own;
//! [`PartitionManager`](super::PartitionManager) drives it.
//!
//! # Steady-State Tick
//!
//! ```text
//! list_all ──▶ reconcile lost leases ──▶ classify each lease ──▶ write
//!                                               │
//!                                               ▼
//!                                       plan_steals ──▶ write
//! ```
//!
//! Every write is conditioned on the version read in the same tick. The first
//! conflict aborts the tick with [`LeaseError::Conflict`]: later decisions
//! were made against a view that is now known to be stale.
//!
//! # Shutdown Tick
//!
//! Only leases this worker owns are examined. Each is marked draining (and a
//! drain started), renewed while its drain runs, then released. Shutdown is
//! complete once a snapshot shows no lease owned by this worker.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::drain_registry::{DrainReason, DrainRegistry, DrainStatus};
use super::error::{LeaseError, LeaseResult};
use super::events::{LeaseEvent, LeaseEventKind};
use super::lease::{Lease, WorkerId};
use super::lease_state::{
    ClassifyContext, LeaseAction, LeaseTimings, TickAccumulator, Transition, classify,
};
use super::listener::PartitionListener;
use super::metrics;
use super::rebalancer::plan_steals;
use super::store::{LeaseStore, WriteOutcome};

/// Partitions announced through `on_lease_acquired`, with the time of the
/// announcement. Shared with readers outside the loop.
pub type AcquiredPartitions = Arc<DashMap<Arc<str>, DateTime<Utc>>>;

/// Summary of one steady-state tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Leases in the snapshot.
    pub total_leases: usize,
    /// Leases this worker holds or is about to hold.
    pub owned_count: usize,
    /// Successful conditional writes.
    pub writes: usize,
    /// Successors recorded by the rebalancer.
    pub steals: usize,
    /// One of our leases is being handed off.
    pub work_on_release: bool,
    /// We are waiting for a lease to be handed to us.
    pub wait_for_partition: bool,
}

impl TickOutcome {
    /// A handoff is in progress in either direction.
    pub fn has_pending_handoff(&self) -> bool {
        self.work_on_release || self.wait_for_partition
    }
}

/// Summary of one shutdown tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownProgress {
    /// Leases owned by this worker in the snapshot.
    pub owned: usize,
    /// Leases released during this tick.
    pub released: usize,
}

impl ShutdownProgress {
    pub fn is_done(&self) -> bool {
        self.owned == 0
    }
}

pub struct LeaseCoordinator {
    worker_id: WorkerId,
    store: Arc<dyn LeaseStore>,
    listener: Arc<dyn PartitionListener>,
    timings: LeaseTimings,
    drains: DrainRegistry,
    acquired: AcquiredPartitions,
    events: broadcast::Sender<LeaseEvent>,
}

impl LeaseCoordinator {
    pub fn new(
        worker_id: WorkerId,
        store: Arc<dyn LeaseStore>,
        listener: Arc<dyn PartitionListener>,
        timings: LeaseTimings,
        events: broadcast::Sender<LeaseEvent>,
    ) -> Self {
        Self {
            worker_id,
            store,
            listener,
            timings,
            drains: DrainRegistry::new(),
            acquired: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Share an existing acquired-partition map, e.g. one a manager reads.
    pub fn with_acquired(mut self, acquired: AcquiredPartitions) -> Self {
        self.acquired = acquired;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn acquired(&self) -> &AcquiredPartitions {
        &self.acquired
    }

    pub fn drains(&self) -> &DrainRegistry {
        &self.drains
    }

    /// Run one steady-state tick against a fresh snapshot.
    pub async fn run_tick(&mut self, now: DateTime<Utc>) -> LeaseResult<TickOutcome> {
        let started = Instant::now();
        let result = self.tick(now).await;
        metrics::record_tick(
            "steady",
            tick_label(&result),
            started.elapsed().as_secs_f64(),
        );
        self.publish_gauges();
        result
    }

    /// Run one shutdown tick against a fresh snapshot.
    pub async fn run_shutdown_tick(&mut self, now: DateTime<Utc>) -> LeaseResult<ShutdownProgress> {
        let started = Instant::now();
        let result = self.shutdown_tick(now).await;
        metrics::record_tick(
            "shutdown",
            tick_label(&result),
            started.elapsed().as_secs_f64(),
        );
        self.publish_gauges();
        result
    }

    /// Wait for every registered drain to finish.
    pub async fn wait_for_drains(&mut self) {
        self.drains.wait_all().await;
        self.publish_gauges();
    }

    async fn tick(&mut self, now: DateTime<Utc>) -> LeaseResult<TickOutcome> {
        let leases = self.store.list_all().await?;
        self.reconcile_lost(&leases);

        let worker = self.worker_id.clone();
        let timings = self.timings;
        let ctx = ClassifyContext {
            worker: &worker,
            now,
            timings: &timings,
        };

        let mut acc = TickAccumulator::default();
        let mut writes = 0;
        for lease in &leases {
            let drain = self.drains.status(lease.partition_id());
            if let Some(transition) = classify(lease, &ctx, drain, &mut acc) {
                self.apply(transition, now).await?;
                writes += 1;
            }
        }

        let steals = plan_steals(&acc.distribution, leases.len(), acc.owned_count);
        let steal_count = steals.len();
        for lease in steals {
            let transition = Transition {
                action: LeaseAction::Steal,
                lease: lease.stolen_by(&worker),
            };
            self.apply(transition, now).await?;
            writes += 1;
        }

        Ok(TickOutcome {
            total_leases: leases.len(),
            owned_count: acc.owned_count + steal_count,
            writes,
            steals: steal_count,
            work_on_release: acc.work_on_release,
            wait_for_partition: acc.wait_for_partition || steal_count > 0,
        })
    }

    async fn shutdown_tick(&mut self, now: DateTime<Utc>) -> LeaseResult<ShutdownProgress> {
        let leases = self.store.list_all().await?;
        let worker = self.worker_id.clone();
        let duration = self.timings.lease_duration;
        let mut progress = ShutdownProgress::default();

        for lease in leases.iter().filter(|l| l.is_owned_by(&worker)) {
            progress.owned += 1;
            let transition = if !lease.is_draining {
                Transition {
                    action: LeaseAction::BeginDrain(DrainReason::Shutdown),
                    lease: lease.draining(now, duration),
                }
            } else if self.drains.status(lease.partition_id()).is_drained() {
                Transition {
                    action: LeaseAction::Release,
                    lease: lease.released(),
                }
            } else {
                Transition {
                    action: LeaseAction::Renew,
                    lease: lease.renewed(now, duration),
                }
            };
            let released = transition.action == LeaseAction::Release;
            self.apply(transition, now).await?;
            if released {
                progress.released += 1;
            }
        }

        debug!(
            worker = &*self.worker_id,
            owned = progress.owned,
            released = progress.released,
            draining = self.drains.running_count(),
            "Shutdown tick"
        );
        Ok(progress)
    }

    /// Stop work on partitions that were taken from us between ticks.
    ///
    /// A lease we announced but no longer own in the snapshot was claimed by
    /// someone else (typically after our lease expired), so processing must
    /// stop even though no handoff was recorded.
    fn reconcile_lost(&mut self, leases: &[Lease]) {
        let still_owned = |pid: &str| {
            leases
                .iter()
                .any(|l| l.partition_id() == pid && l.is_owned_by(&self.worker_id))
        };

        let lost: Vec<Arc<str>> = self
            .acquired
            .iter()
            .filter(|entry| !still_owned(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        for partition_id in lost {
            self.acquired.remove(&partition_id);
            warn!(
                worker = &*self.worker_id,
                partition_id = &*partition_id,
                "Lost partition lease without handoff, draining"
            );
            self.start_drain(&partition_id, DrainReason::LeaseLost);
        }

        // Finished drains for leases we no longer own have nothing left to report.
        for lease in leases.iter().filter(|l| !l.is_owned_by(&self.worker_id)) {
            self.drains.remove_finished(lease.partition_id());
        }
    }

    /// Conditionally write a transition and run its side effects on success.
    async fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> LeaseResult<()> {
        let action = transition.action;
        let partition_id = transition.lease.partition_id.clone();
        let expected = transition.lease.version.clone();

        match self
            .store
            .conditional_update(&transition.lease, &expected)
            .await
        {
            Ok(WriteOutcome::Written(version)) => {
                metrics::record_lease_operation(action.as_str(), "success");
                debug!(
                    worker = &*self.worker_id,
                    partition_id = &*partition_id,
                    operation = action.as_str(),
                    version = %version,
                    "Lease written"
                );
                self.after_write(action, &transition.lease, now).await;
                Ok(())
            }
            Ok(WriteOutcome::Conflict) => {
                metrics::record_lease_operation(action.as_str(), "conflict");
                debug!(
                    worker = &*self.worker_id,
                    partition_id = &*partition_id,
                    operation = action.as_str(),
                    "Lease modified concurrently, abandoning tick"
                );
                Err(LeaseError::Conflict {
                    partition_id: partition_id.to_string(),
                })
            }
            Err(e) => {
                metrics::record_lease_operation(action.as_str(), "error");
                warn!(
                    worker = &*self.worker_id,
                    partition_id = &*partition_id,
                    operation = action.as_str(),
                    error = %e,
                    "Lease write failed"
                );
                Err(e)
            }
        }
    }

    async fn after_write(&mut self, action: LeaseAction, lease: &Lease, now: DateTime<Utc>) {
        let partition_id = &lease.partition_id;
        let kind = match action {
            LeaseAction::Claim => {
                // Claims wait out running drains, so only a finished one is dropped here.
                self.drains.remove(partition_id);
                info!(
                    worker = &*self.worker_id,
                    partition_id = &**partition_id,
                    expires_at = %lease.expires_at,
                    "Claimed partition"
                );
                self.announce(partition_id, now).await;
                LeaseEventKind::Claimed
            }
            LeaseAction::Renew => {
                // Adopt leases held from before a restart.
                if !lease.is_draining
                    && self.drains.status(partition_id) == DrainStatus::Idle
                    && !self.acquired.contains_key(partition_id)
                {
                    info!(
                        worker = &*self.worker_id,
                        partition_id = &**partition_id,
                        "Adopting previously owned partition"
                    );
                    self.announce(partition_id, now).await;
                }
                LeaseEventKind::Renewed
            }
            LeaseAction::Steal => {
                info!(
                    worker = &*self.worker_id,
                    partition_id = &**partition_id,
                    from = lease.current_owner().unwrap_or("none"),
                    "Requested partition handoff"
                );
                LeaseEventKind::Stolen
            }
            LeaseAction::BeginDrain(reason) => {
                self.acquired.remove(partition_id);
                info!(
                    worker = &*self.worker_id,
                    partition_id = &**partition_id,
                    reason = %reason,
                    next_owner = lease.next_owner().unwrap_or("none"),
                    "Draining partition"
                );
                self.start_drain(partition_id, reason);
                LeaseEventKind::DrainStarted(reason)
            }
            LeaseAction::Release => {
                let drained_for = self.drains.remove(partition_id);
                self.acquired.remove(partition_id);
                info!(
                    worker = &*self.worker_id,
                    partition_id = &**partition_id,
                    next_owner = lease.next_owner().unwrap_or("none"),
                    drained_for = ?drained_for,
                    "Released partition"
                );
                LeaseEventKind::Released
            }
        };

        // No subscribers is fine.
        let _ = self.events.send(LeaseEvent {
            worker_id: self.worker_id.clone(),
            partition_id: partition_id.clone(),
            kind,
        });
    }

    async fn announce(&mut self, partition_id: &Arc<str>, now: DateTime<Utc>) {
        if self.acquired.insert(partition_id.clone(), now).is_none() {
            self.listener.on_lease_acquired(partition_id).await;
        }
    }

    fn start_drain(&mut self, partition_id: &Arc<str>, reason: DrainReason) {
        let listener = self.listener.clone();
        let pid = partition_id.clone();
        self.drains.start(partition_id, reason, async move {
            listener.on_drain_requested(&pid, reason).await;
        });
    }

    fn publish_gauges(&self) {
        metrics::set_owned_partitions(&self.worker_id, self.acquired.len());
        metrics::set_drains_in_flight(&self.worker_id, self.drains.running_count());
    }
}

impl std::fmt::Debug for LeaseCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseCoordinator")
            .field("worker_id", &self.worker_id)
            .field("timings", &self.timings)
            .field("acquired", &self.acquired.len())
            .field("drains", &self.drains)
            .finish()
    }
}

fn tick_label<T>(result: &LeaseResult<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.as_metric_label(),
    }
}
