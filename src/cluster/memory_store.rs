//! In-memory lease store.
//!
//! A full implementation of [`LeaseStore`] backed by a shared map, so many
//! workers in one process can coordinate through it exactly as they would
//! through a remote table. Clones share the same table.
//!
//! Besides the store contract it offers fault injection for tests:
//! forced write conflicts, simulated unavailability, and unconditional
//! overwrites that stand in for "another writer got there first".
//!
//! # Usage
//!
//! ```rust,no_run
//! use leasekeeper::cluster::{InMemoryLeaseStore, LeaseStore};
//!
//! # async fn example() -> leasekeeper::cluster::LeaseResult<()> {
//! let store = InMemoryLeaseStore::new();
//! store.create_if_missing().await?;
//! let shared = store.clone(); // same table
//! assert!(shared.list_all().await?.is_empty());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::error::{LeaseError, LeaseResult};
use super::lease::{Lease, VersionToken};
use super::store::{InsertOutcome, LeaseStore, WriteOutcome};

/// Rows keyed by partition id. `None` means the table does not exist.
type LeaseTable = Option<BTreeMap<Arc<str>, Lease>>;

#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseStore {
    /// Shared table state.
    table: Arc<RwLock<LeaseTable>>,
    /// Monotonic source of version tokens.
    next_version: Arc<AtomicU64>,
    /// Number of upcoming conditional writes to reject as conflicts.
    forced_conflicts: Arc<AtomicU32>,
    /// When set, every operation fails with a store error.
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLeaseStore {
    /// Create a store whose table does not exist yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the table already created and empty.
    pub fn with_table() -> Self {
        Self {
            table: Arc::new(RwLock::new(Some(BTreeMap::new()))),
            ..Self::default()
        }
    }

    fn mint_version(&self) -> VersionToken {
        let v = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        VersionToken::new(format!("v{v}"))
    }

    fn check_available(&self) -> LeaseResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LeaseError::Store("lease store unavailable".to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Test Helpers
    // ========================================================================

    /// Get the stored copy of one lease.
    pub async fn get(&self, partition_id: &str) -> Option<Lease> {
        self.table
            .read()
            .await
            .as_ref()
            .and_then(|rows| rows.get(partition_id).cloned())
    }

    /// Overwrite a lease regardless of its version, as a competing writer would.
    ///
    /// Returns the new version, or `None` if the table or row does not exist.
    pub async fn force_update(&self, lease: &Lease) -> Option<VersionToken> {
        let mut table = self.table.write().await;
        let row = table.as_mut()?.get_mut(&lease.partition_id)?;
        let version = self.mint_version();
        *row = Lease {
            version: version.clone(),
            ..lease.clone()
        };
        Some(version)
    }

    /// Reject the next `count` conditional writes as conflicts.
    pub fn fail_next_writes(&self, count: u32) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    /// Make every operation fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of rows, or 0 if the table does not exist.
    pub async fn len(&self) -> usize {
        self.table.read().await.as_ref().map_or(0, |rows| rows.len())
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Count leases whose current owner is `worker`.
    pub async fn owned_by(&self, worker: &str) -> usize {
        self.table.read().await.as_ref().map_or(0, |rows| {
            rows.values().filter(|l| l.is_owned_by(worker)).count()
        })
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn create_if_missing(&self) -> LeaseResult<()> {
        self.check_available()?;
        let mut table = self.table.write().await;
        if table.is_none() {
            *table = Some(BTreeMap::new());
        }
        Ok(())
    }

    async fn delete_all(&self) -> LeaseResult<()> {
        self.check_available()?;
        *self.table.write().await = None;
        Ok(())
    }

    async fn list_all(&self) -> LeaseResult<Vec<Lease>> {
        self.check_available()?;
        let table = self.table.read().await;
        let rows = table.as_ref().ok_or(LeaseError::StoreNotFound)?;
        Ok(rows.values().cloned().collect())
    }

    async fn insert_if_absent(&self, lease: &Lease) -> LeaseResult<InsertOutcome> {
        self.check_available()?;
        let mut table = self.table.write().await;
        let rows = table.as_mut().ok_or(LeaseError::StoreNotFound)?;
        if rows.contains_key(&lease.partition_id) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        let stored = Lease {
            version: self.mint_version(),
            ..lease.clone()
        };
        rows.insert(lease.partition_id.clone(), stored);
        Ok(InsertOutcome::Inserted)
    }

    async fn conditional_update(
        &self,
        lease: &Lease,
        expected: &VersionToken,
    ) -> LeaseResult<WriteOutcome> {
        self.check_available()?;
        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Ok(WriteOutcome::Conflict);
        }

        let mut table = self.table.write().await;
        let rows = table.as_mut().ok_or(LeaseError::StoreNotFound)?;
        let Some(row) = rows.get_mut(&lease.partition_id) else {
            return Err(LeaseError::Store(format!(
                "no lease row for partition {}",
                lease.partition_id
            )));
        };
        if &row.version != expected {
            return Ok(WriteOutcome::Conflict);
        }
        let version = self.mint_version();
        *row = Lease {
            version: version.clone(),
            ..lease.clone()
        };
        Ok(WriteOutcome::Written(version))
    }
}
