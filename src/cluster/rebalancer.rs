//! Greedy fair-share rebalancing.
//!
//! Each worker independently computes its fair share from the snapshot and
//! steals from the most loaded peers until it reaches that share. There is no
//! leader: two workers racing for the same lease are serialized by the
//! conditional write, and the loser simply re-reads on its next tick.
//!
//! # Algorithm
//!
//! ```text
//! target = max(1, total_leases / (other_workers + 1))
//! needed = target - own_count
//!
//! repeat while needed > 0:
//!     for each peer, most loaded first:
//!         if peer holds more than target: take one stealable lease
//!     stop if a full pass took nothing
//! ```
//!
//! A stolen lease only gets a successor recorded. The current owner drains
//! and releases it on its own schedule.

use super::lease::Lease;
use super::lease_state::OwnershipDistribution;

/// Leases each worker should hold when `total` leases are spread over
/// `other_workers + 1` workers. Never less than one.
pub fn fair_share(total: usize, other_workers: usize) -> usize {
    (total / (other_workers + 1)).max(1)
}

/// Pick leases to steal so this worker approaches its fair share.
///
/// `distribution` maps each other worker to the leases it holds or is about
/// to hold. Leases already mid-handoff (with a successor recorded) count
/// toward their bucket but are never picked. Peers at or below the target
/// are never stolen from, so a worker will not drive another below its share.
pub fn plan_steals(distribution: &OwnershipDistribution, total: usize, own_count: usize) -> Vec<Lease> {
    if distribution.is_empty() {
        return Vec::new();
    }

    let target = fair_share(total, distribution.len());
    let mut needed = target.saturating_sub(own_count);
    if needed == 0 {
        return Vec::new();
    }

    // (remaining count, stealable leases) per peer
    let mut peers: Vec<(usize, Vec<&Lease>)> = distribution
        .values()
        .map(|leases| {
            let stealable = leases.iter().filter(|l| l.next_owner.is_none()).collect();
            (leases.len(), stealable)
        })
        .collect();

    let mut stolen = Vec::with_capacity(needed);
    while needed > 0 {
        // Stable sort keeps worker-id order among equally loaded peers.
        peers.sort_by(|a, b| b.0.cmp(&a.0));

        let mut progressed = false;
        for (count, stealable) in peers.iter_mut() {
            if needed == 0 {
                break;
            }
            if *count <= target {
                continue;
            }
            let Some(lease) = stealable.pop() else {
                continue;
            };
            stolen.push(lease.clone());
            *count -= 1;
            needed -= 1;
            progressed = true;
        }

        if !progressed {
            break;
        }
    }

    stolen
}
