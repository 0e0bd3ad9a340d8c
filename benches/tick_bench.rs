//! Criterion micro-benchmarks for the coordination tick.
//!
//! These benchmarks measure:
//! - Classification of a full snapshot from one worker's point of view
//! - Steal planning against skewed ownership
//! - A complete steady-state tick against the in-memory store
//!
//! Run with: `cargo bench --bench tick_bench`

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use leasekeeper::cluster::lease_state::{ClassifyContext, TickAccumulator, classify};
use leasekeeper::cluster::rebalancer::plan_steals;
use leasekeeper::cluster::{
    DrainStatus, InMemoryLeaseStore, Lease, LeaseCoordinator, LeaseStore, LeaseTimings,
    NoopListener, WorkerId,
};
use tokio::sync::{Mutex, broadcast};

const WORKERS: usize = 8;

fn timings() -> LeaseTimings {
    LeaseTimings {
        own_epoch: TimeDelta::seconds(60),
        lease_duration: TimeDelta::seconds(30),
        stuck_after: TimeDelta::seconds(90),
    }
}

/// `count` live leases spread round-robin over `WORKERS` workers, with every
/// tenth one mid-handoff.
fn snapshot(count: usize) -> Vec<Lease> {
    let now = Utc::now();
    let workers: Vec<WorkerId> = (0..WORKERS).map(|w| Arc::from(format!("worker-{w}"))).collect();
    (0..count)
        .map(|i| {
            let owner = &workers[i % WORKERS];
            let lease = Lease::new(format!("p-{i}")).claimed_by(owner, now, timings().own_epoch);
            if i % 10 == 0 {
                lease.stolen_by(&workers[(i + 1) % WORKERS])
            } else {
                lease
            }
        })
        .collect()
}

fn classify_all(leases: &[Lease], worker: &WorkerId) -> TickAccumulator {
    let timings = timings();
    let ctx = ClassifyContext {
        worker,
        now: Utc::now(),
        timings: &timings,
    };
    let mut acc = TickAccumulator::default();
    for lease in leases {
        black_box(classify(lease, &ctx, DrainStatus::Idle, &mut acc));
    }
    acc
}

/// Benchmark classifying a snapshot as a newly joined worker.
fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let newcomer: WorkerId = Arc::from("worker-new");

    for size in [100, 1_000, 10_000].iter() {
        let leases = snapshot(*size);
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("snapshot", size), size, |b, _| {
            b.iter(|| classify_all(black_box(&leases), &newcomer));
        });
    }

    group.finish();
}

/// Benchmark steal planning for a worker holding nothing.
fn bench_plan_steals(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_steals");
    let newcomer: WorkerId = Arc::from("worker-new");

    for size in [100, 1_000, 10_000].iter() {
        let acc = classify_all(&snapshot(*size), &newcomer);

        group.bench_with_input(BenchmarkId::new("newcomer", size), size, |b, size| {
            b.iter(|| plan_steals(black_box(&acc.distribution), *size, acc.owned_count));
        });
    }

    group.finish();
}

/// Benchmark a steady-state tick in which every lease is renewed.
fn bench_renew_tick(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let mut group = c.benchmark_group("renew_tick");

    for size in [10, 100, 1_000].iter() {
        let store = Arc::new(InMemoryLeaseStore::with_table());
        let (events, _) = broadcast::channel(16);
        let coordinator = rt.block_on(async {
            for i in 0..*size {
                store
                    .insert_if_absent(&Lease::new(format!("p-{i}")))
                    .await
                    .expect("insert");
            }
            let mut coordinator = LeaseCoordinator::new(
                Arc::from("worker-0"),
                store.clone(),
                Arc::new(NoopListener),
                timings(),
                events,
            );
            // First tick claims everything; later ticks only renew.
            coordinator.run_tick(Utc::now()).await.expect("claim tick");
            Arc::new(Mutex::new(coordinator))
        });

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("in_memory", size), size, |b, _| {
            b.to_async(&rt).iter(|| {
                let coordinator = coordinator.clone();
                async move {
                    let outcome = coordinator.lock().await.run_tick(Utc::now()).await;
                    black_box(outcome)
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_classify, bench_plan_steals, bench_renew_tick);

criterion_main!(benches);
