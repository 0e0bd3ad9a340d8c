//! Centralized lease protocol constants.
//!
//! Timing defaults for the partition ownership protocol live here so that
//! configuration defaults, validation and tests agree on the same numbers.
//!
//! # Categories
//!
//! - **Lease Timing**: How long claims and renewals keep a lease alive
//! - **Loop Timing**: How often the coordination loop wakes up
//! - **Recovery**: Thresholds for overriding stuck handoffs

// =============================================================================
// Lease Timing
// =============================================================================

/// Expiry granted to a freshly claimed lease (seconds).
///
/// A claim is given a longer first epoch than a renewal so the new owner has
/// time to start consuming before it must renew.
pub const DEFAULT_OWN_EPOCH_SECS: u64 = 60;

/// Extension applied to `expires_at` on every renewal (seconds).
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 30;

// =============================================================================
// Loop Timing
// =============================================================================

/// Sleep between quiescent ticks (milliseconds).
///
/// Must stay well below [`DEFAULT_LEASE_DURATION_SECS`] so that owned leases
/// are renewed several times before they could expire.
pub const DEFAULT_LEASE_RENEW_INTERVAL_MS: u64 = 10_000;

/// Sleep between ticks while a handoff is pending, and between shutdown
/// passes (milliseconds).
pub const DEFAULT_RELEASE_POLL_INTERVAL_MS: u64 = 1_000;

/// Jitter applied to the quiescent sleep, as a fraction of the base interval.
pub const RENEW_INTERVAL_JITTER: f64 = 0.15;

// =============================================================================
// Recovery
// =============================================================================

/// Multiple of the lease duration after which an expired lease is claimable
/// even if a handoff was in flight.
///
/// Guards against a drain that never completes because its owner died.
pub const DEFAULT_STUCK_LEASE_MULTIPLIER: u32 = 3;

/// Capacity of the lifecycle event broadcast channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Default name of the lease table.
pub const DEFAULT_LEASE_TABLE_NAME: &str = "partitions";
