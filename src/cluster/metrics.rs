//! Prometheus metrics for the lease protocol.
//!
//! Metrics cover:
//! - Lease operations (claim, renew, steal, drain, release) by outcome
//! - Partition ownership (owned partitions, drains in flight)
//! - Coordination ticks (duration and outcome, for both loop modes)
//! - Conditional write conflicts
//!
//! # Safety
//!
//! All metrics are registered to a custom registry with the "leasekeeper"
//! prefix to avoid name collisions with other libraries using the default
//! Prometheus registry. Registration errors are handled gracefully: if a
//! metric fails to register, the unregistered metric is used instead of
//! panicking.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry,
    TextEncoder, opts,
};
use tracing::warn;

/// Custom Prometheus registry for lease metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("leasekeeper".to_string()), None).unwrap_or_else(|_| Registry::new())
});

// =============================================================================
// Metric Declaration Macros
// =============================================================================
//
//   define_gauge_vec!(MY_GAUGE, "my_metric", "Description", ["label1"]);
//   define_counter_vec!(MY_COUNTER, "my_metric", "Description", ["label1"]);
//   define_histogram_vec!(MY_HISTOGRAM, "my_metric", "Description", ["label"],
//       [0.001, 0.01, 0.1, 1.0]);

/// Declare an IntGaugeVec metric with labels.
macro_rules! define_gauge_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntGaugeVec> = Lazy::new(|| {
            register_int_gauge_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare an IntCounterVec metric with labels.
macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare an IntCounter metric (no labels).
macro_rules! define_counter {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounter> =
            Lazy::new(|| register_int_counter_safe(&REGISTRY, $metric_name, $help));
    };
}

/// Declare a HistogramVec metric with labels and buckets.
macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Lease metrics
// =============================================================================

define_counter_vec!(
    LEASE_OPERATIONS,
    "lease_operations_total",
    "Lease writes by operation and outcome",
    ["operation", "status"]
);
define_counter!(
    WRITE_CONFLICTS,
    "lease_write_conflicts_total",
    "Conditional lease writes rejected because another worker wrote first"
);

// =============================================================================
// Ownership metrics
// =============================================================================

define_gauge_vec!(
    OWNED_PARTITIONS,
    "owned_partitions",
    "Number of partitions owned by this worker",
    ["worker"]
);
define_gauge_vec!(
    DRAINS_IN_FLIGHT,
    "drains_in_flight",
    "Number of partition drains still running",
    ["worker"]
);

// =============================================================================
// Tick metrics
// =============================================================================

define_histogram_vec!(
    TICK_DURATION,
    "tick_duration_seconds",
    "Duration of one coordination tick",
    ["mode"],
    [0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
);
define_counter_vec!(
    TICK_OUTCOMES,
    "tick_outcomes_total",
    "Coordination ticks by mode and result",
    ["mode", "result"]
);

// =============================================================================
// Safe Registration Helpers
// =============================================================================
//
// These functions register metrics to the custom registry and handle errors
// gracefully by returning the unregistered metric instead of panicking.

fn register_int_gauge_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntGaugeVec {
    let gauge = IntGaugeVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntGaugeVec metric, using unregistered fallback");
            gauge
        }
    }
}

fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
            counter
        }
    }
}

fn register_int_counter_safe(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounter metric, using unregistered fallback");
            counter
        }
    }
}

fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    match registry.register(Box::new(histogram.clone())) {
        Ok(()) => histogram,
        Err(e) => {
            warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
            histogram
        }
    }
}

/// Force registration of every metric.
///
/// Idempotent. Metrics are otherwise registered lazily on first use.
pub fn init_metrics() {
    let _ = &*LEASE_OPERATIONS;
    let _ = &*WRITE_CONFLICTS;
    let _ = &*OWNED_PARTITIONS;
    let _ = &*DRAINS_IN_FLIGHT;
    let _ = &*TICK_DURATION;
    let _ = &*TICK_OUTCOMES;
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// =============================================================================
// Recording helpers
// =============================================================================

/// Record a lease write by operation ("claim", "renew", ...) and status
/// ("success", "conflict", "error").
pub fn record_lease_operation(operation: &str, status: &str) {
    LEASE_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
    if status == "conflict" {
        WRITE_CONFLICTS.inc();
    }
}

pub fn set_owned_partitions(worker: &str, count: usize) {
    OWNED_PARTITIONS
        .with_label_values(&[worker])
        .set(count as i64);
}

pub fn set_drains_in_flight(worker: &str, count: usize) {
    DRAINS_IN_FLIGHT
        .with_label_values(&[worker])
        .set(count as i64);
}

/// Record one tick. `mode` is "steady" or "shutdown".
pub fn record_tick(mode: &str, result: &str, duration_secs: f64) {
    TICK_DURATION.with_label_values(&[mode]).observe(duration_secs);
    TICK_OUTCOMES.with_label_values(&[mode, result]).inc();
}
