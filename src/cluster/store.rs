//! Lease record store abstraction.
//!
//! The coordination protocol needs nothing from storage beyond a versioned
//! key-value table with optimistic concurrency. This trait captures exactly
//! that contract so the protocol can run against any backend.
//!
//! # Available Implementations
//!
//! - [`InMemoryLeaseStore`](super::InMemoryLeaseStore): shared in-process table,
//!   used by tests, benchmarks and single-host simulations
//!
//! # Contract
//!
//! - `list_all` returns a snapshot with no cross-row transactional guarantee;
//!   each row's [`VersionToken`] is valid for that row only.
//! - `conditional_update` must never silently overwrite: a stale token yields
//!   [`WriteOutcome::Conflict`] and leaves the stored record untouched.
//! - `insert_if_absent` reports a pre-existing row as
//!   [`InsertOutcome::AlreadyExists`], not as an error.

use async_trait::async_trait;

use super::error::LeaseResult;
use super::lease::{Lease, VersionToken};

/// Outcome of inserting a partition row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was created.
    Inserted,
    /// A row for this partition already existed and was left untouched.
    AlreadyExists,
}

/// Outcome of a conditional write.
///
/// `Conflict` is an expected result, not a fault: it means another writer won
/// and the caller's view is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write took effect; the record now carries this version.
    Written(VersionToken),
    /// The stored version differed from the expected one; nothing was written.
    Conflict,
}

impl WriteOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, WriteOutcome::Conflict)
    }
}

/// Versioned table holding one lease per partition.
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
    /// Create the table if it does not exist yet.
    async fn create_if_missing(&self) -> LeaseResult<()>;

    /// Delete the table and every lease in it.
    async fn delete_all(&self) -> LeaseResult<()>;

    /// Read every lease, each carrying its current version.
    async fn list_all(&self) -> LeaseResult<Vec<Lease>>;

    /// Insert a row for `lease.partition_id` unless one exists.
    async fn insert_if_absent(&self, lease: &Lease) -> LeaseResult<InsertOutcome>;

    /// Replace the stored lease if its version still equals `expected`.
    async fn conditional_update(
        &self,
        lease: &Lease,
        expected: &VersionToken,
    ) -> LeaseResult<WriteOutcome>;
}
