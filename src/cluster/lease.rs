//! The persisted lease record, one per partition.
//!
//! A [`Lease`] is treated as an immutable value: every mutation is a pure
//! transform that returns a new record, and the new record only becomes real
//! once a conditional write carrying the *original* [`VersionToken`] succeeds.
//!
//! # Ownership Fields
//!
//! ```text
//! current_owner  next_owner  is_draining   meaning
//! ─────────────  ──────────  ───────────   ───────────────────────────────
//! None           None        false         unowned, claimable by anyone
//! Some(a)        None        false         actively owned by a
//! Some(a)        Some(b)     false/true    handoff from a to b in progress
//! Some(a)        None        true          a is draining for shutdown
//! None           Some(b)     false         a released, b may claim
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::error::LeaseResult;

/// Identity of a worker process participating in the ownership pool.
///
/// Uses `Arc<str>` so identities can be cloned into distribution maps and
/// events without reallocating.
pub type WorkerId = Arc<str>;

/// Opaque version supplied by the store.
///
/// A conditional write succeeds only if the stored record still carries the
/// token the writer read. Stores choose the representation; callers only
/// compare tokens for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token carried by a record that has never been written.
    pub fn unwritten() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Versioned ownership record for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Stable identity of the partition.
    pub partition_id: Arc<str>,
    /// Worker currently processing the partition.
    pub current_owner: Option<WorkerId>,
    /// Worker designated to take over once the current owner releases.
    pub next_owner: Option<WorkerId>,
    /// When the current owner claimed the lease.
    pub owned_since: Option<DateTime<Utc>>,
    /// When the lease was last claimed or renewed.
    pub last_renewal: Option<DateTime<Utc>>,
    /// Instant after which the lease is considered abandoned.
    pub expires_at: DateTime<Utc>,
    /// Whether the current owner is stopping work on the partition.
    pub is_draining: bool,
    /// Version captured when this copy was read.
    pub version: VersionToken,
}

impl Lease {
    /// Create the bootstrap row for a partition: unowned and already expired.
    pub fn new(partition_id: impl Into<Arc<str>>) -> Self {
        Self {
            partition_id: partition_id.into(),
            current_owner: None,
            next_owner: None,
            owned_since: None,
            last_renewal: None,
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
            is_draining: false,
            version: VersionToken::unwritten(),
        }
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    pub fn current_owner(&self) -> Option<&str> {
        self.current_owner.as_deref()
    }

    pub fn next_owner(&self) -> Option<&str> {
        self.next_owner.as_deref()
    }

    pub fn is_owned_by(&self, worker: &str) -> bool {
        self.current_owner() == Some(worker)
    }

    /// No owner and no designated successor.
    pub fn is_unowned(&self) -> bool {
        self.current_owner.is_none() && self.next_owner.is_none()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// How long the lease has been expired, or `None` if it has not.
    pub fn expired_for(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        if self.is_expired(now) {
            Some(now - self.expires_at)
        } else {
            None
        }
    }

    /// Encode as a JSON document, for stores that keep one document per row.
    ///
    /// The version is included; stores that track versions out of band may
    /// overwrite it on read.
    pub fn to_json(&self) -> LeaseResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> LeaseResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    // ========================================================================
    // Pure Transforms
    // ========================================================================

    /// Take ownership: clears any successor and any drain in progress.
    pub fn claimed_by(&self, worker: &WorkerId, now: DateTime<Utc>, own_epoch: TimeDelta) -> Self {
        Self {
            current_owner: Some(worker.clone()),
            next_owner: None,
            owned_since: Some(now),
            last_renewal: Some(now),
            expires_at: now + own_epoch,
            is_draining: false,
            ..self.clone()
        }
    }

    /// Push expiry forward. Never moves `expires_at` backwards.
    pub fn renewed(&self, now: DateTime<Utc>, lease_duration: TimeDelta) -> Self {
        Self {
            last_renewal: Some(now),
            expires_at: self.expires_at.max(now + lease_duration),
            ..self.clone()
        }
    }

    /// Designate `worker` as successor.
    pub fn stolen_by(&self, worker: &WorkerId) -> Self {
        Self {
            next_owner: Some(worker.clone()),
            ..self.clone()
        }
    }

    /// Mark the lease as draining and renew it so the drain has time to finish.
    pub fn draining(&self, now: DateTime<Utc>, lease_duration: TimeDelta) -> Self {
        Self {
            is_draining: true,
            ..self.renewed(now, lease_duration)
        }
    }

    /// Give up ownership; a designated successor stays in place to claim.
    pub fn released(&self) -> Self {
        Self {
            current_owner: None,
            is_draining: false,
            ..self.clone()
        }
    }
}
