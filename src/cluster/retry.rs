//! Retry policy for administrative store operations.
//!
//! The coordination loop never retries a write: a failed tick simply starts
//! over from a fresh snapshot. Administrative calls (creating the table,
//! bootstrapping partition rows) have no loop behind them, so they retry
//! transient store faults with backoff using the `backon` crate.
//!
//! | Policy | Min Delay | Max Delay | Retries |
//! |--------|-----------|-----------|---------|
//! | `store_policy` | 20ms | 2s | 5 |
//!
//! # Example
//!
//! ```rust,no_run
//! use leasekeeper::cluster::{LeaseError, retry};
//!
//! async fn example() -> Result<(), LeaseError> {
//!     retry::with_store_policy("example", || async { Ok::<_, LeaseError>(()) }).await
//! }
//! ```

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use super::error::LeaseError;

/// Policy for store calls made outside the coordination loop.
///
/// Characteristics:
/// - Short initial delay (20ms) for fast recovery from blips
/// - Moderate max delay (2s) to ride out brief store outages
/// - Includes jitter so workers bootstrapping together do not retry in step
pub fn store_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(20))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(5)
        .with_jitter()
}

/// Run `operation` under [`store_policy`], retrying only retryable errors.
///
/// `name` labels the retry attempts in logs.
pub async fn with_store_policy<F, Fut, T>(name: &str, operation: F) -> Result<T, LeaseError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, LeaseError>>,
{
    operation
        .retry(store_policy())
        .when(LeaseError::is_retryable)
        .notify(|e, delay| {
            tracing::debug!(operation = name, error = %e, ?delay, "Retrying store operation");
        })
        .await
        .inspect_err(|e| {
            tracing::warn!(operation = name, error = %e, "Store operation failed");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_transient_store_errors() {
        let attempts = AtomicU32::new(0);

        let result = with_store_policy("test", || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < 2 {
                Err(LeaseError::Store("timeout".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_config_errors() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), LeaseError> = with_store_policy("test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(LeaseError::Config("bad".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), LeaseError> = with_store_policy("test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(LeaseError::StoreNotFound)
        })
        .await;

        assert!(matches!(result, Err(LeaseError::StoreNotFound)));
        // Initial attempt + 5 retries
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }
}
