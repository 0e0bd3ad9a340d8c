//! Configuration for the partition manager.
//!
//! # Timing
//!
//! ```text
//! ├── own_epoch ──────────────────────────────┤  expiry granted on claim
//! ├── lease_duration ───────┤                    extension granted per renewal
//! ├─ renew ─┤                                    loop sleep when nothing is pending
//! ├┤                                             release_poll_interval during handoffs
//! ```
//!
//! A lease is renewed several times per `lease_duration`, so a single slow
//! tick does not lose it. A lease stuck in a handoff is overridden once it has
//! been expired for `stuck_lease_multiplier × lease_duration`.
//!
//! # Example
//!
//! ```rust,no_run
//! use leasekeeper::cluster::PartitionManagerConfig;
//! use std::time::Duration;
//!
//! let config = PartitionManagerConfig {
//!     worker_id: "worker-1".to_string(),
//!     lease_renew_interval: Duration::from_secs(5),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use super::error::{LeaseError, LeaseResult};
use crate::constants::{
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_RENEW_INTERVAL_MS,
    DEFAULT_LEASE_TABLE_NAME, DEFAULT_OWN_EPOCH_SECS, DEFAULT_RELEASE_POLL_INTERVAL_MS,
    DEFAULT_STUCK_LEASE_MULTIPLIER,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionManagerConfig {
    /// Unique identity of this worker among all workers sharing the store.
    pub worker_id: String,

    /// Name of the lease table, used in logs.
    pub lease_table_name: String,

    /// Expiry granted when a lease is claimed.
    pub own_epoch: Duration,

    /// Extension granted on each renewal.
    pub lease_duration: Duration,

    /// Sleep between ticks when no handoff is pending.
    pub lease_renew_interval: Duration,

    /// Sleep between ticks while a handoff is pending and during shutdown.
    pub release_poll_interval: Duration,

    /// Multiple of `lease_duration` after which an expired lease is claimable
    /// even if a handoff is recorded on it.
    pub stuck_lease_multiplier: u32,

    /// Capacity of the lease event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for PartitionManagerConfig {
    fn default() -> Self {
        Self {
            worker_id: generated_worker_id(),
            lease_table_name: DEFAULT_LEASE_TABLE_NAME.to_string(),
            own_epoch: Duration::from_secs(DEFAULT_OWN_EPOCH_SECS),
            lease_duration: Duration::from_secs(DEFAULT_LEASE_DURATION_SECS),
            lease_renew_interval: Duration::from_millis(DEFAULT_LEASE_RENEW_INTERVAL_MS),
            release_poll_interval: Duration::from_millis(DEFAULT_RELEASE_POLL_INTERVAL_MS),
            stuck_lease_multiplier: DEFAULT_STUCK_LEASE_MULTIPLIER,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Random worker identity for callers that do not name their workers.
fn generated_worker_id() -> String {
    format!("worker-{:016x}", fastrand::u64(..))
}

impl PartitionManagerConfig {
    /// Default configuration with the given worker identity.
    pub fn for_worker(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration and return any errors found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.worker_id.trim().is_empty() {
            errors.push("worker_id must not be empty".to_string());
        }

        // Renewal must happen before the extension it grants runs out
        if self.lease_renew_interval >= self.lease_duration {
            errors.push(format!(
                "lease_renew_interval ({:?}) must be less than lease_duration ({:?})",
                self.lease_renew_interval, self.lease_duration
            ));
        }

        if self.lease_duration > self.own_epoch {
            errors.push(format!(
                "lease_duration ({:?}) must not exceed own_epoch ({:?})",
                self.lease_duration, self.own_epoch
            ));
        }

        if self.release_poll_interval.is_zero() {
            errors.push("release_poll_interval must be greater than 0".to_string());
        }

        if self.stuck_lease_multiplier == 0 {
            errors.push("stuck_lease_multiplier must be at least 1".to_string());
        } else if i32::try_from(self.stuck_lease_multiplier).is_err() {
            errors.push(format!(
                "stuck_lease_multiplier ({}) must not exceed {}",
                self.stuck_lease_multiplier,
                i32::MAX
            ));
        }

        if self.event_channel_capacity == 0 {
            errors.push("event_channel_capacity must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold every problem into one [`LeaseError::Config`].
    pub fn validated(self) -> LeaseResult<Self> {
        match self.validate() {
            Ok(()) => Ok(self),
            Err(errors) => Err(LeaseError::Config(errors.join("; "))),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LEASE_WORKER_ID`: Worker identity (default: random)
    /// - `LEASE_TABLE_NAME`: Lease table name (default: partitions)
    /// - `LEASE_OWN_EPOCH_SECS`: Claim expiry in seconds (default: 60)
    /// - `LEASE_DURATION_SECS`: Renewal extension in seconds (default: 30)
    /// - `LEASE_RENEW_INTERVAL_MS`: Loop sleep in milliseconds (default: 10000)
    /// - `LEASE_RELEASE_POLL_INTERVAL_MS`: Handoff poll in milliseconds (default: 1000)
    /// - `LEASE_STUCK_MULTIPLIER`: Stuck lease multiplier (default: 3)
    ///
    /// The result is validated before it is returned.
    pub fn from_env() -> LeaseResult<Self> {
        let defaults = Self::default();

        let worker_id = std::env::var("LEASE_WORKER_ID").unwrap_or(defaults.worker_id);
        let lease_table_name =
            std::env::var("LEASE_TABLE_NAME").unwrap_or(defaults.lease_table_name);

        let own_epoch = match env_parse::<u64>("LEASE_OWN_EPOCH_SECS")? {
            Some(secs) => Duration::from_secs(secs),
            None => defaults.own_epoch,
        };
        let lease_duration = match env_parse::<u64>("LEASE_DURATION_SECS")? {
            Some(secs) => Duration::from_secs(secs),
            None => defaults.lease_duration,
        };
        let lease_renew_interval = match env_parse::<u64>("LEASE_RENEW_INTERVAL_MS")? {
            Some(ms) => Duration::from_millis(ms),
            None => defaults.lease_renew_interval,
        };
        let release_poll_interval = match env_parse::<u64>("LEASE_RELEASE_POLL_INTERVAL_MS")? {
            Some(ms) => Duration::from_millis(ms),
            None => defaults.release_poll_interval,
        };
        let stuck_lease_multiplier =
            env_parse::<u32>("LEASE_STUCK_MULTIPLIER")?.unwrap_or(defaults.stuck_lease_multiplier);

        Self {
            worker_id,
            lease_table_name,
            own_epoch,
            lease_duration,
            lease_renew_interval,
            release_poll_interval,
            stuck_lease_multiplier,
            event_channel_capacity: defaults.event_channel_capacity,
        }
        .validated()
    }
}

/// Parse an optional environment variable.
fn env_parse<T>(name: &str) -> LeaseResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| LeaseError::Config(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(None),
    }
}
