//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use leasekeeper::cluster::PartitionManagerConfig;
use tokio::time::{Instant, sleep};

/// Millisecond-scale timings so whole lifecycles run in well under a second.
pub fn fast_config(worker_id: &str) -> PartitionManagerConfig {
    PartitionManagerConfig {
        worker_id: worker_id.to_string(),
        own_epoch: Duration::from_secs(1),
        lease_duration: Duration::from_millis(500),
        lease_renew_interval: Duration::from_millis(50),
        release_poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    check().await
}
