//! Per-lease classification: the pure core of each coordination tick.
//!
//! Every lease in a snapshot is run through three classifiers against the
//! local worker's identity and the current time:
//!
//! - [`check_claimable`]: take the lease if it is unowned, expired, released
//!   to us, or stuck in a handoff for far too long
//! - [`check_self_owned`]: renew our lease, or drain and release it when a
//!   successor has been designated
//! - [`check_other_owner`]: record other workers' holdings for rebalancing,
//!   and steal leases whose owner is shutting down
//!
//! The classifiers never touch the store. They return a [`Transition`] holding
//! the new record (still carrying the version that was read) and update a
//! [`TickAccumulator`] that feeds the rebalancer and the loop's sleep choice.
//!
//! # State Transitions (one worker's view of one partition)
//!
//! ```text
//! Unowned ──claim──▶ OwnedByMe ──successor appears──▶ DrainingForHandoff
//!    ▲                                                        │
//!    └──────────────────────── release ◀──────────────────────┘
//!
//! OwnedByOther ──owner shuts down / rebalance──▶ HandoffToMe
//!                                                     │ owner releases
//!                                                     ▼
//!                                               ReleasedToMe ──claim──▶ OwnedByMe
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::config::PartitionManagerConfig;
use super::drain_registry::{DrainReason, DrainStatus};
use super::error::{LeaseError, LeaseResult};
use super::lease::{Lease, WorkerId};

/// Leases observed per worker, keyed by the worker expected to hold them.
pub type OwnershipDistribution = BTreeMap<WorkerId, Vec<Lease>>;

/// How a lease looks from one worker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseView {
    /// Nobody owns the partition and nobody is designated to.
    Unowned,
    /// The previous owner released and we are the designated successor.
    ReleasedToMe,
    /// The previous owner released to another worker.
    ReleasedToOther,
    /// We own it with no handoff pending.
    OwnedByMe,
    /// We own it and are draining because another worker takes over.
    DrainingForHandoff,
    /// We own it and are draining because we are shutting down.
    DrainingForShutdown,
    /// Another worker owns it with no handoff pending.
    OwnedByOther,
    /// Another worker owns it and is shutting down with no successor.
    OtherShuttingDown,
    /// Another worker owns it and we are the designated successor.
    HandoffToMe,
    /// Another worker owns it and a third worker is the successor.
    HandoffToOther,
}

impl LeaseView {
    pub fn of(lease: &Lease, worker: &str) -> Self {
        let next_is_me = lease.next_owner() == Some(worker);
        match (lease.current_owner(), lease.next_owner()) {
            (None, None) => LeaseView::Unowned,
            (None, Some(_)) if next_is_me => LeaseView::ReleasedToMe,
            (None, Some(_)) => LeaseView::ReleasedToOther,
            (Some(owner), None) if owner == worker => {
                if lease.is_draining {
                    LeaseView::DrainingForShutdown
                } else {
                    LeaseView::OwnedByMe
                }
            }
            (Some(owner), Some(_)) if owner == worker => LeaseView::DrainingForHandoff,
            (Some(_), None) if lease.is_draining => LeaseView::OtherShuttingDown,
            (Some(_), None) => LeaseView::OwnedByOther,
            (Some(_), Some(_)) if next_is_me => LeaseView::HandoffToMe,
            (Some(_), Some(_)) => LeaseView::HandoffToOther,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseView::Unowned => "unowned",
            LeaseView::ReleasedToMe => "released_to_me",
            LeaseView::ReleasedToOther => "released_to_other",
            LeaseView::OwnedByMe => "owned_by_me",
            LeaseView::DrainingForHandoff => "draining_for_handoff",
            LeaseView::DrainingForShutdown => "draining_for_shutdown",
            LeaseView::OwnedByOther => "owned_by_other",
            LeaseView::OtherShuttingDown => "other_shutting_down",
            LeaseView::HandoffToMe => "handoff_to_me",
            LeaseView::HandoffToOther => "handoff_to_other",
        }
    }

    /// True for views in which this worker holds the lease.
    pub fn is_mine(&self) -> bool {
        matches!(
            self,
            LeaseView::OwnedByMe | LeaseView::DrainingForHandoff | LeaseView::DrainingForShutdown
        )
    }
}

impl fmt::Display for LeaseView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lease timing in wall-clock units, resolved once from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTimings {
    /// Expiry granted on claim.
    pub own_epoch: TimeDelta,
    /// Extension granted on renewal.
    pub lease_duration: TimeDelta,
    /// How long past expiry a lease becomes claimable despite a pending handoff.
    pub stuck_after: TimeDelta,
}

impl LeaseTimings {
    pub fn from_config(config: &PartitionManagerConfig) -> LeaseResult<Self> {
        let to_delta = |name: &str, d: std::time::Duration| {
            TimeDelta::from_std(d)
                .map_err(|e| LeaseError::Config(format!("{name} ({d:?}) is out of range: {e}")))
        };
        let own_epoch = to_delta("own_epoch", config.own_epoch)?;
        let lease_duration = to_delta("lease_duration", config.lease_duration)?;
        let multiplier = config.stuck_lease_multiplier;
        let stuck_after = i32::try_from(multiplier)
            .ok()
            .and_then(|m| lease_duration.checked_mul(m))
            .ok_or_else(|| {
                LeaseError::Config(format!("stuck_lease_multiplier ({multiplier}) is out of range"))
            })?;
        Ok(Self {
            own_epoch,
            lease_duration,
            stuck_after,
        })
    }
}

/// Everything the classifiers need besides the lease itself.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext<'a> {
    pub worker: &'a WorkerId,
    pub now: DateTime<Utc>,
    pub timings: &'a LeaseTimings,
}

/// What a transition does to a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseAction {
    Claim,
    Renew,
    Steal,
    BeginDrain(DrainReason),
    Release,
}

impl LeaseAction {
    /// Returns a string label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseAction::Claim => "claim",
            LeaseAction::Renew => "renew",
            LeaseAction::Steal => "steal",
            LeaseAction::BeginDrain(_) => "drain",
            LeaseAction::Release => "release",
        }
    }
}

/// An intended write: the action and the record to write.
///
/// `lease.version` is still the version read from the snapshot, which is the
/// token the conditional write must be conditioned on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub action: LeaseAction,
    pub lease: Lease,
}

impl Transition {
    fn new(action: LeaseAction, lease: Lease) -> Self {
        Self { action, lease }
    }
}

/// State gathered across one tick's classification pass.
#[derive(Debug, Clone, Default)]
pub struct TickAccumulator {
    /// Other workers' current or expected holdings.
    pub distribution: OwnershipDistribution,
    /// Leases this worker holds or is about to hold.
    pub owned_count: usize,
    /// A lease of ours has a successor and is being drained or released.
    pub work_on_release: bool,
    /// We are waiting for another worker to hand a lease to us.
    pub wait_for_partition: bool,
}

impl TickAccumulator {
    fn record(&mut self, worker: &WorkerId, lease: &Lease) {
        self.distribution
            .entry(worker.clone())
            .or_default()
            .push(lease.clone());
    }
}

// ============================================================================
// Classifiers
// ============================================================================

/// Claim the lease when it is free to take.
///
/// Claimable when any of:
/// - fully unowned
/// - expired with no successor designated
/// - released by its owner with us as successor
/// - expired for longer than the stuck threshold, whatever the handoff state
pub fn check_claimable(lease: &Lease, ctx: &ClassifyContext<'_>) -> Option<Transition> {
    let worker: &str = ctx.worker;
    let is_unowned = lease.is_unowned();
    let is_expired = lease.is_expired(ctx.now) && lease.next_owner.is_none();
    let is_released_to_me = lease.current_owner.is_none() && lease.next_owner() == Some(worker);
    let is_stuck = lease
        .expired_for(ctx.now)
        .is_some_and(|overdue| overdue > ctx.timings.stuck_after);

    if is_unowned || is_expired || is_released_to_me || is_stuck {
        Some(Transition::new(
            LeaseAction::Claim,
            lease.claimed_by(ctx.worker, ctx.now, ctx.timings.own_epoch),
        ))
    } else {
        None
    }
}

/// Maintain a lease this worker owns.
///
/// With no successor the lease is renewed. With a successor, the lease is
/// first marked draining (and a drain is started by the caller once the write
/// lands), then released once `drain` reports that the work has stopped.
pub fn check_self_owned(
    lease: &Lease,
    ctx: &ClassifyContext<'_>,
    drain: DrainStatus,
    acc: &mut TickAccumulator,
) -> Option<Transition> {
    let duration = ctx.timings.lease_duration;
    if lease.next_owner.is_none() {
        acc.owned_count += 1;
        return Some(Transition::new(
            LeaseAction::Renew,
            lease.renewed(ctx.now, duration),
        ));
    }

    acc.work_on_release = true;
    let transition = if !lease.is_draining {
        Transition::new(
            LeaseAction::BeginDrain(DrainReason::LeaseLost),
            lease.draining(ctx.now, duration),
        )
    } else if drain.is_drained() {
        Transition::new(LeaseAction::Release, lease.released())
    } else {
        Transition::new(LeaseAction::Renew, lease.renewed(ctx.now, duration))
    };
    Some(transition)
}

/// Account for a lease held or awaited by another worker.
///
/// Leases are bucketed under the worker expected to hold them after any
/// pending handoff; a handoff to a third party is presumed to succeed. A
/// lease whose owner is draining for shutdown is stolen outright.
pub fn check_other_owner(
    lease: &Lease,
    ctx: &ClassifyContext<'_>,
    acc: &mut TickAccumulator,
) -> Option<Transition> {
    let worker: &str = ctx.worker;
    match (&lease.next_owner, lease.is_draining) {
        (Some(next), _) if &**next == worker => {
            acc.owned_count += 1;
            acc.wait_for_partition = true;
            None
        }
        (Some(next), _) => {
            acc.record(next, lease);
            None
        }
        (None, false) => {
            if let Some(owner) = &lease.current_owner {
                acc.record(owner, lease);
            }
            None
        }
        (None, true) => {
            acc.owned_count += 1;
            acc.wait_for_partition = true;
            Some(Transition::new(LeaseAction::Steal, lease.stolen_by(ctx.worker)))
        }
    }
}

/// Run all three classifiers over one lease.
///
/// A claimed lease counts toward this worker's holdings and is not examined
/// further this tick. A claimable lease whose previous drain on this worker
/// is still running is left alone until the drain finishes, so the service
/// never hears "start" before the earlier "stop" has returned.
pub fn classify(
    lease: &Lease,
    ctx: &ClassifyContext<'_>,
    drain: DrainStatus,
    acc: &mut TickAccumulator,
) -> Option<Transition> {
    if let Some(claim) = check_claimable(lease, ctx) {
        acc.owned_count += 1;
        if drain == DrainStatus::Running {
            acc.wait_for_partition = true;
            return None;
        }
        return Some(claim);
    }
    if lease.is_owned_by(ctx.worker) {
        check_self_owned(lease, ctx, drain, acc)
    } else {
        check_other_owner(lease, ctx, acc)
    }
}
