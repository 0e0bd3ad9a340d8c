//! Error types for the partition lease protocol.
//!
//! # Error Handling Patterns
//!
//! Errors fall into three groups based on how the coordination loop reacts:
//!
//! ## Transient (Retry From A Fresh Snapshot)
//!
//! - [`LeaseError::Conflict`]: a conditional write lost a race. The losing
//!   write had no effect, so the only correct reaction is to re-read.
//! - [`LeaseError::Store`] and [`LeaseError::StoreNotFound`]: the store was
//!   unreachable or missing. The loop logs and retries immediately.
//!
//! ## Benign
//!
//! Inserting a partition row that already exists is not an error at all; the
//! store reports it through
//! [`InsertOutcome::AlreadyExists`](super::store::InsertOutcome::AlreadyExists).
//!
//! ## Fatal (Construction Time Only)
//!
//! - [`LeaseError::Config`]: raised once by
//!   [`PartitionManager::new`](super::PartitionManager::new) and never retried.

use thiserror::Error;

/// Result type for lease operations.
pub type LeaseResult<T> = Result<T, LeaseError>;

/// Errors that can occur while coordinating partition leases.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// A conditional write found a newer version than the one it read.
    #[error("Lease {partition_id} was modified concurrently")]
    Conflict { partition_id: String },

    /// The lease store has not been created, or has been deleted.
    #[error("Lease store does not exist")]
    StoreNotFound,

    /// Unexpected storage failure.
    #[error("Lease store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The coordination loop task panicked or was cancelled.
    #[error("Coordination task failed: {0}")]
    TaskFailed(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl LeaseError {
    /// Returns true if this error means another writer won a race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LeaseError::Conflict { .. })
    }

    /// Returns true if retrying from a fresh snapshot can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LeaseError::Conflict { .. } | LeaseError::Store(_) | LeaseError::StoreNotFound
        )
    }

    /// Returns a string label for metrics.
    pub fn as_metric_label(&self) -> &'static str {
        match self {
            LeaseError::Conflict { .. } => "conflict",
            LeaseError::StoreNotFound => "store_not_found",
            LeaseError::Store(_) => "store",
            LeaseError::Config(_) => "config",
            LeaseError::TaskFailed(_) => "task_failed",
            LeaseError::Serde(_) => "serde",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_retryable() {
        let err = LeaseError::Conflict {
            partition_id: "p-0".to_string(),
        };
        assert!(err.is_conflict());
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Lease p-0 was modified concurrently");
    }

    #[test]
    fn test_config_is_fatal() {
        let err = LeaseError::Config("worker_id must not be empty".to_string());
        assert!(!err.is_conflict());
        assert!(!err.is_retryable());
        assert_eq!(err.as_metric_label(), "config");
    }

    #[test]
    fn test_store_errors_are_retryable_but_not_conflicts() {
        assert!(LeaseError::Store("timeout".into()).is_retryable());
        assert!(LeaseError::StoreNotFound.is_retryable());
        assert!(!LeaseError::StoreNotFound.is_conflict());
    }
}
