//! Ownership change notifications.
//!
//! Every successful lease write is published as a [`LeaseEvent`] on a
//! broadcast channel. Subscribers that fall behind miss events rather than
//! slowing the coordination loop.

use std::fmt;

use serde::Serialize;

use super::drain_registry::DrainReason;
use super::lease::WorkerId;

/// What happened to a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum LeaseEventKind {
    /// The worker became the current owner.
    Claimed,
    /// The worker recorded itself as successor of another worker's lease.
    Stolen,
    /// The worker extended a lease it owns.
    Renewed,
    /// The worker marked its lease as draining and started a drain.
    DrainStarted(DrainReason),
    /// The worker gave up ownership.
    Released,
}

impl LeaseEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseEventKind::Claimed => "claimed",
            LeaseEventKind::Stolen => "stolen",
            LeaseEventKind::Renewed => "renewed",
            LeaseEventKind::DrainStarted(_) => "drain_started",
            LeaseEventKind::Released => "released",
        }
    }
}

impl fmt::Display for LeaseEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseEventKind::DrainStarted(reason) => write!(f, "drain_started({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A successful lease write by one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseEvent {
    pub worker_id: WorkerId,
    pub partition_id: std::sync::Arc<str>,
    pub kind: LeaseEventKind,
}
