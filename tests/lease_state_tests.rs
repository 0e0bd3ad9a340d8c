//! Lease state machine walkthroughs.
//!
//! Drives a single lease through whole lifecycles using only the pure
//! classifiers and transforms, checking each worker's view at every step.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use leasekeeper::cluster::lease_state::{
    ClassifyContext, LeaseAction, TickAccumulator, Transition, classify,
};
use leasekeeper::cluster::rebalancer::plan_steals;
use leasekeeper::cluster::{DrainReason, DrainStatus, Lease, LeaseTimings, LeaseView, WorkerId};

fn timings() -> LeaseTimings {
    LeaseTimings {
        own_epoch: TimeDelta::seconds(60),
        lease_duration: TimeDelta::seconds(30),
        stuck_after: TimeDelta::seconds(90),
    }
}

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Classify one lease for `worker` and return the transition and accumulator.
fn step(
    lease: &Lease,
    worker: &WorkerId,
    now: DateTime<Utc>,
    drain: DrainStatus,
) -> (Option<Transition>, TickAccumulator) {
    let timings = timings();
    let ctx = ClassifyContext {
        worker,
        now,
        timings: &timings,
    };
    let mut acc = TickAccumulator::default();
    let transition = classify(lease, &ctx, drain, &mut acc);
    (transition, acc)
}

/// Apply a transition as a successful write would.
fn write(transition: Option<Transition>) -> Lease {
    transition.expect("expected a write").lease
}

#[test]
fn test_full_handoff_lifecycle() {
    let a: WorkerId = Arc::from("worker-a");
    let b: WorkerId = Arc::from("worker-b");
    let now = t0();

    // 1. A claims the bootstrap row.
    let lease = Lease::new("orders-0");
    assert_eq!(LeaseView::of(&lease, &a), LeaseView::Unowned);
    let (t, acc) = step(&lease, &a, now, DrainStatus::Idle);
    assert_eq!(t.as_ref().map(|t| t.action), Some(LeaseAction::Claim));
    assert_eq!(acc.owned_count, 1);
    let lease = write(t);
    assert_eq!(LeaseView::of(&lease, &a), LeaseView::OwnedByMe);
    assert_eq!(LeaseView::of(&lease, &b), LeaseView::OwnedByOther);

    // 2. B sees A over its fair share and records itself as successor.
    let (t, acc) = step(&lease, &b, now, DrainStatus::Idle);
    assert!(t.is_none());
    let stolen = plan_steals(&acc.distribution, 2, acc.owned_count);
    assert!(stolen.is_empty(), "one lease each is fair for 2 leases");
    let stolen = plan_steals(&acc.distribution, 1, acc.owned_count);
    assert!(stolen.is_empty(), "A is not above its share of one");

    let lease = lease.stolen_by(&b);
    assert_eq!(LeaseView::of(&lease, &a), LeaseView::DrainingForHandoff);
    assert_eq!(LeaseView::of(&lease, &b), LeaseView::HandoffToMe);

    // 3. B waits; A starts draining.
    let (t, acc) = step(&lease, &b, now, DrainStatus::Idle);
    assert!(t.is_none());
    assert!(acc.wait_for_partition);
    assert_eq!(acc.owned_count, 1);

    let later = now + TimeDelta::seconds(5);
    let (t, acc) = step(&lease, &a, later, DrainStatus::Idle);
    assert_eq!(
        t.as_ref().map(|t| t.action),
        Some(LeaseAction::BeginDrain(DrainReason::LeaseLost))
    );
    assert!(acc.work_on_release);
    let lease = write(t);
    assert!(lease.is_draining);

    // 4. Still draining: A keeps the lease alive.
    let (t, _) = step(&lease, &a, later, DrainStatus::Running);
    assert_eq!(t.as_ref().map(|t| t.action), Some(LeaseAction::Renew));
    let lease = write(t);

    // 5. Drain done: A releases, successor stays.
    let (t, _) = step(&lease, &a, later, DrainStatus::Completed);
    assert_eq!(t.as_ref().map(|t| t.action), Some(LeaseAction::Release));
    let lease = write(t);
    assert_eq!(lease.current_owner(), None);
    assert_eq!(lease.next_owner(), Some("worker-b"));
    assert_eq!(LeaseView::of(&lease, &a), LeaseView::ReleasedToOther);
    assert_eq!(LeaseView::of(&lease, &b), LeaseView::ReleasedToMe);

    // A does not take it back.
    let (t, _) = step(&lease, &a, later, DrainStatus::Idle);
    assert!(t.is_none());

    // 6. B claims.
    let (t, acc) = step(&lease, &b, later, DrainStatus::Idle);
    assert_eq!(t.as_ref().map(|t| t.action), Some(LeaseAction::Claim));
    assert_eq!(acc.owned_count, 1);
    let lease = write(t);
    assert_eq!(lease.current_owner(), Some("worker-b"));
    assert_eq!(lease.next_owner(), None);
    assert!(!lease.is_draining);
    assert_eq!(lease.owned_since, Some(later));
}

#[test]
fn test_shutdown_lifecycle_with_steal() {
    let a: WorkerId = Arc::from("worker-a");
    let b: WorkerId = Arc::from("worker-b");
    let now = t0();

    let lease = Lease::new("orders-1").claimed_by(&a, now, timings().own_epoch);

    // A begins shutting down with no successor.
    let lease = lease.draining(now, timings().lease_duration);
    assert_eq!(LeaseView::of(&lease, &a), LeaseView::DrainingForShutdown);
    assert_eq!(LeaseView::of(&lease, &b), LeaseView::OtherShuttingDown);

    // B records itself as successor straight away.
    let (t, acc) = step(&lease, &b, now, DrainStatus::Idle);
    assert_eq!(t.as_ref().map(|t| t.action), Some(LeaseAction::Steal));
    assert!(acc.wait_for_partition);
    assert_eq!(acc.owned_count, 1);
    let lease = write(t);
    assert_eq!(lease.current_owner(), Some("worker-a"));
    assert_eq!(lease.next_owner(), Some("worker-b"));

    // A finishes and releases to B.
    let (t, _) = step(&lease, &a, now, DrainStatus::Completed);
    assert_eq!(t.as_ref().map(|t| t.action), Some(LeaseAction::Release));
    let lease = write(t);

    let (t, _) = step(&lease, &b, now, DrainStatus::Idle);
    assert_eq!(t.map(|t| t.action), Some(LeaseAction::Claim));
}

#[test]
fn test_crash_lifecycle() {
    let a: WorkerId = Arc::from("worker-a");
    let b: WorkerId = Arc::from("worker-b");
    let c: WorkerId = Arc::from("worker-c");
    let now = t0();

    // A claims, B becomes successor, then both crash.
    let lease = Lease::new("orders-2")
        .claimed_by(&a, now, timings().own_epoch)
        .stolen_by(&b);

    // Expired but the handoff is not yet stuck: C leaves it alone.
    let after_expiry = lease.expires_at + TimeDelta::seconds(10);
    let (t, acc) = step(&lease, &c, after_expiry, DrainStatus::Idle);
    assert!(t.is_none());
    assert_eq!(acc.distribution.get("worker-b").map(Vec::len), Some(1));

    // Past the stuck threshold: C claims outright.
    let stuck = lease.expires_at + TimeDelta::seconds(91);
    let (t, _) = step(&lease, &c, stuck, DrainStatus::Idle);
    let lease = write(t);
    assert_eq!(lease.current_owner(), Some("worker-c"));
    assert_eq!(lease.next_owner(), None);
    assert_eq!(lease.expires_at, stuck + timings().own_epoch);
}

#[test]
fn test_renewal_keeps_lease_for_owner() {
    let a: WorkerId = Arc::from("worker-a");
    let b: WorkerId = Arc::from("worker-b");
    let now = t0();

    let mut lease = Lease::new("orders-3").claimed_by(&a, now, timings().own_epoch);
    for tick in 1..=10 {
        let at = now + TimeDelta::seconds(10 * tick);
        let (t, _) = step(&lease, &a, at, DrainStatus::Idle);
        lease = write(t);
        assert!(!lease.is_expired(at));

        // Nobody else can claim a lease that is being renewed.
        let (t, _) = step(&lease, &b, at, DrainStatus::Idle);
        assert!(t.is_none());
    }
    assert_eq!(lease.owned_since, Some(now));
}
