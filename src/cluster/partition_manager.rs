//! Partition manager: lifecycle and background loop for one worker.
//!
//! Responsibilities:
//! - Bootstrap and tear down the lease table
//! - Run the coordination loop (one tick per interval) until stopped
//! - On stop, drain and release every owned lease before returning
//! - Expose ownership and lease diagnostics to the surrounding service
//!
//! # Loop Timing
//!
//! | Tick result | Next sleep |
//! |-------------|------------|
//! | Conflict or store error | none, retry immediately |
//! | Handoff pending (either direction) | `release_poll_interval` |
//! | Quiescent | `lease_renew_interval` ± 15% |
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use leasekeeper::cluster::{
//!     InMemoryLeaseStore, NoopListener, PartitionManager, PartitionManagerConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryLeaseStore::new());
//!     let config = PartitionManagerConfig::for_worker("worker-1");
//!     let manager = PartitionManager::new(config, store, Arc::new(NoopListener))?;
//!
//!     manager.create_lease_store().await?;
//!     manager.create_leases((0..8).map(|i| format!("p-{i}"))).await?;
//!
//!     manager.start().await?;
//!     // ... serve traffic ...
//!     manager.stop().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::PartitionManagerConfig;
use super::error::{LeaseError, LeaseResult};
use super::events::LeaseEvent;
use super::lease::{Lease, WorkerId};
use super::lease_coordinator::{AcquiredPartitions, LeaseCoordinator, TickOutcome};
use super::lease_state::{LeaseTimings, LeaseView};
use super::listener::PartitionListener;
use super::retry;
use super::store::{InsertOutcome, LeaseStore};
use crate::constants::RENEW_INTERVAL_JITTER;

/// Add jitter to a duration to prevent thundering herd.
///
/// Adds +/- 15% pseudo-random jitter so workers started together do not
/// read and write the table in lockstep.
fn with_jitter(base: Duration) -> Duration {
    let jitter_factor = 1.0 - RENEW_INTERVAL_JITTER + fastrand::f64() * 2.0 * RENEW_INTERVAL_JITTER;
    Duration::from_secs_f64(base.as_secs_f64() * jitter_factor)
}

/// Sleep before the next steady-state tick.
fn next_delay(result: &LeaseResult<TickOutcome>, config: &PartitionManagerConfig) -> Duration {
    match result {
        Err(_) => Duration::ZERO,
        Ok(outcome) if outcome.has_pending_handoff() => config.release_poll_interval,
        Ok(_) => with_jitter(config.lease_renew_interval),
    }
}

/// A lease together with how this worker sees it.
#[derive(Debug, Clone, Serialize)]
pub struct LeaseDescription {
    pub lease: Lease,
    pub view: LeaseView,
    pub expired: bool,
}

/// Runs the lease protocol for one worker.
pub struct PartitionManager {
    config: PartitionManagerConfig,
    worker_id: WorkerId,
    store: Arc<dyn LeaseStore>,
    listener: Arc<dyn PartitionListener>,
    timings: LeaseTimings,

    /// Coordinator while the loop is not running.
    coordinator: Mutex<Option<LeaseCoordinator>>,

    /// Loop task; it hands the coordinator back when it exits.
    loop_handle: Mutex<Option<JoinHandle<LeaseCoordinator>>>,

    /// Partitions announced to the listener, shared with the coordinator.
    acquired: AcquiredPartitions,

    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,

    /// Lease event sender.
    events: broadcast::Sender<LeaseEvent>,
}

impl PartitionManager {
    /// Create a manager. Fails only on invalid configuration.
    ///
    /// Concrete `Arc<T>` handles coerce at the call site, and already-erased
    /// `Arc<dyn LeaseStore>` handles are accepted as they are.
    pub fn new(
        config: PartitionManagerConfig,
        store: Arc<dyn LeaseStore>,
        listener: Arc<dyn PartitionListener>,
    ) -> LeaseResult<Self> {
        let config = config.validated()?;
        let timings = LeaseTimings::from_config(&config)?;
        let worker_id: WorkerId = Arc::from(config.worker_id.as_str());
        let (shutdown_tx, _) = broadcast::channel(1);
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        let acquired: AcquiredPartitions = Arc::new(DashMap::new());

        let coordinator = LeaseCoordinator::new(
            worker_id.clone(),
            store.clone(),
            listener.clone(),
            timings,
            events.clone(),
        )
        .with_acquired(acquired.clone());

        let manager = Self {
            worker_id,
            store,
            listener,
            timings,
            coordinator: Mutex::new(Some(coordinator)),
            loop_handle: Mutex::new(None),
            acquired,
            shutdown_tx,
            events,
            config,
        };

        info!(
            worker = &*manager.worker_id,
            table = %manager.config.lease_table_name,
            own_epoch = ?manager.config.own_epoch,
            lease_duration = ?manager.config.lease_duration,
            renew_interval = ?manager.config.lease_renew_interval,
            "Partition manager created"
        );
        Ok(manager)
    }

    fn fresh_coordinator(&self) -> LeaseCoordinator {
        LeaseCoordinator::new(
            self.worker_id.clone(),
            self.store.clone(),
            self.listener.clone(),
            self.timings,
            self.events.clone(),
        )
        .with_acquired(self.acquired.clone())
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn config(&self) -> &PartitionManagerConfig {
        &self.config
    }

    /// Receive every lease write this worker makes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LeaseEvent> {
        self.events.subscribe()
    }

    /// Partitions this worker is currently processing, sorted.
    pub fn owned_partitions(&self) -> Vec<String> {
        let mut owned: Vec<String> = self
            .acquired
            .iter()
            .map(|entry| entry.key().to_string())
            .collect();
        owned.sort();
        owned
    }

    pub fn owned_partition_count(&self) -> usize {
        self.acquired.len()
    }

    pub async fn is_running(&self) -> bool {
        self.loop_handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    // ========================================================================
    // Administrative Operations
    // ========================================================================

    /// Create the lease table if it does not exist.
    pub async fn create_lease_store(&self) -> LeaseResult<()> {
        retry::with_store_policy("create_lease_store", || self.store.create_if_missing()).await?;
        info!(table = %self.config.lease_table_name, "Lease table ready");
        Ok(())
    }

    /// Delete the lease table and every lease in it.
    pub async fn delete_leases(&self) -> LeaseResult<()> {
        self.store.delete_all().await?;
        info!(table = %self.config.lease_table_name, "Lease table deleted");
        Ok(())
    }

    /// Insert the row for one partition unless it exists.
    pub async fn create_lease(&self, partition_id: &str) -> LeaseResult<InsertOutcome> {
        let lease = Lease::new(partition_id);
        let outcome =
            retry::with_store_policy("create_lease", || self.store.insert_if_absent(&lease))
                .await?;
        match outcome {
            InsertOutcome::Inserted => debug!(partition_id, "Created lease"),
            InsertOutcome::AlreadyExists => debug!(partition_id, "Lease already exists"),
        }
        Ok(outcome)
    }

    /// Insert rows for a fixed partition set. Returns how many were new.
    pub async fn create_leases<I, P>(&self, partition_ids: I) -> LeaseResult<usize>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let mut inserted = 0;
        let mut existing = 0;
        for partition_id in partition_ids {
            match self.create_lease(partition_id.as_ref()).await? {
                InsertOutcome::Inserted => inserted += 1,
                InsertOutcome::AlreadyExists => existing += 1,
            }
        }
        info!(
            table = %self.config.lease_table_name,
            inserted,
            existing,
            "Bootstrapped partition leases"
        );
        Ok(inserted)
    }

    /// Read every lease.
    pub async fn list_leases(&self) -> LeaseResult<Vec<Lease>> {
        self.store.list_all().await
    }

    /// Read every lease along with this worker's view of it.
    pub async fn describe_leases(&self) -> LeaseResult<Vec<LeaseDescription>> {
        let now = Utc::now();
        let leases = self.store.list_all().await?;
        Ok(leases
            .into_iter()
            .map(|lease| LeaseDescription {
                view: LeaseView::of(&lease, &self.worker_id),
                expired: lease.is_expired(now),
                lease,
            })
            .collect())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the coordination loop. Does nothing if it is already running.
    pub async fn start(&self) -> LeaseResult<()> {
        let mut loop_handle = self.loop_handle.lock().await;
        if loop_handle.is_some() {
            warn!(worker = &*self.worker_id, "Partition manager already started");
            return Ok(());
        }

        let coordinator = self.coordinator.lock().await.take().ok_or_else(|| {
            LeaseError::TaskFailed("coordinator was lost by a failed loop".to_string())
        })?;
        let shutdown_rx = self.shutdown_tx.subscribe();
        *loop_handle = Some(tokio::spawn(run_coordination_loop(
            coordinator,
            self.config.clone(),
            shutdown_rx,
        )));

        info!(worker = &*self.worker_id, "Partition manager started");
        Ok(())
    }

    /// Stop the loop, then drain and release every owned lease.
    ///
    /// Returns once no lease in the table is owned by this worker and every
    /// drain has finished. Does nothing if the loop is not running.
    pub async fn stop(&self) -> LeaseResult<()> {
        let Some(handle) = self.loop_handle.lock().await.take() else {
            debug!(worker = &*self.worker_id, "Partition manager not running");
            return Ok(());
        };

        info!(worker = &*self.worker_id, "Shutting down partition manager");
        let _ = self.shutdown_tx.send(());
        let mut coordinator = handle
            .await
            .map_err(|e| LeaseError::TaskFailed(e.to_string()))?;

        run_shutdown_loop(&mut coordinator, self.config.release_poll_interval).await;
        *self.coordinator.lock().await = Some(coordinator);

        info!(worker = &*self.worker_id, "Partition manager shutdown complete");
        Ok(())
    }

    /// Kill the loop without draining or releasing anything.
    ///
    /// Leases are left to expire, as if the process had crashed. In-flight
    /// drains are detached. The manager can be started again afterwards with
    /// a fresh coordinator, as a restarted process would be.
    pub async fn abandon(&self) {
        if let Some(handle) = self.loop_handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.acquired.clear();
        *self.coordinator.lock().await = Some(self.fresh_coordinator());
        warn!(worker = &*self.worker_id, "Partition manager abandoned its leases");
    }
}

impl std::fmt::Debug for PartitionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionManager")
            .field("worker_id", &self.worker_id)
            .field("owned", &self.acquired.len())
            .finish()
    }
}

async fn run_coordination_loop(
    mut coordinator: LeaseCoordinator,
    config: PartitionManagerConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> LeaseCoordinator {
    loop {
        let result = coordinator.run_tick(Utc::now()).await;
        match &result {
            Ok(outcome) => debug!(
                worker = coordinator.worker_id(),
                owned = outcome.owned_count,
                total = outcome.total_leases,
                writes = outcome.writes,
                steals = outcome.steals,
                work_on_release = outcome.work_on_release,
                wait_for_partition = outcome.wait_for_partition,
                "Tick complete"
            ),
            Err(e) if e.is_conflict() => {
                debug!(worker = coordinator.worker_id(), error = %e, "Tick lost a write race")
            }
            Err(e) => warn!(worker = coordinator.worker_id(), error = %e, "Tick failed (will retry)"),
        }

        tokio::select! {
            _ = tokio::time::sleep(next_delay(&result, &config)) => {},
            _ = shutdown_rx.recv() => {
                info!(worker = coordinator.worker_id(), "Coordination loop received shutdown signal");
                break;
            }
        }
    }
    coordinator
}

async fn run_shutdown_loop(coordinator: &mut LeaseCoordinator, poll_interval: Duration) {
    loop {
        let delay = match coordinator.run_shutdown_tick(Utc::now()).await {
            Ok(progress) if progress.is_done() => break,
            Ok(_) => poll_interval,
            Err(e) if e.is_conflict() => {
                debug!(worker = coordinator.worker_id(), error = %e, "Shutdown tick lost a write race");
                Duration::ZERO
            }
            Err(e) => {
                warn!(worker = coordinator.worker_id(), error = %e, "Shutdown tick failed (will retry)");
                Duration::ZERO
            }
        };
        tokio::time::sleep(delay).await;
    }

    // Drains for partitions lost mid-run may still be going.
    coordinator.wait_for_drains().await;
}
