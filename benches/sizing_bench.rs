//! Benchmarks for the fleet scheduler.
//!
//! Benchmarks cover:
//! - Desired size computation for both sizing modes
//! - Rate-limit backoff under contention
//! - End-to-end job throughput against the in-memory provider

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use prometheus_fleet::core::{
    ConnectPolicy, FleetScheduler, Image, InstanceOps, PoolBound, RateLimitState, ShellCommand,
    ShipBlueprint, SizingPolicy,
};
use prometheus_fleet::infra::{InMemoryProvisioner, InMemoryShell};

use tokio::runtime::Runtime;

fn bench_desired_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("desired_size");
    let policies = [
        ("clamp", SizingPolicy::clamp(2, 64)),
        ("spare", SizingPolicy::spare(4, 64)),
        (
            "dynamic",
            SizingPolicy::Clamp {
                min_pool_size: PoolBound::dynamic(|| 2),
                max_pool_size: PoolBound::dynamic(|| 64),
            },
        ),
    ];
    for (name, policy) in &policies {
        group.bench_function(*name, |b| {
            b.iter(|| {
                let mut total = 0;
                for queued in 0..100 {
                    total += policy.desired_size(black_box(queued), black_box(8));
                }
                total
            });
        });
    }
    group.finish();
}

fn bench_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff_delay");
    for polls in [1_usize, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(polls), &polls, |b, &polls| {
            let state = RateLimitState::shared();
            let _guards: Vec<_> = (0..polls).map(|_| state.enter_poll()).collect();
            b.iter(|| black_box(state.backoff_delay(Duration::from_secs(60))));
        });
    }
    group.finish();
}

fn fleet(max_pool_size: usize) -> FleetScheduler {
    let provisioner = InMemoryProvisioner::new().with_settle_polls(0);
    let image = provisioner.add_image(Image {
        id: 0,
        name: "bench".into(),
        slug: None,
        distribution: None,
        public: false,
    });
    let blueprint = ShipBlueprint {
        name_prefix: "bench".into(),
        size: "512mb".into(),
        image,
        connect: ConnectPolicy::default(),
    };
    FleetScheduler::new(
        InstanceOps::new(Arc::new(provisioner)),
        Arc::new(InMemoryShell::new()),
        blueprint,
        SizingPolicy::clamp(0, max_pool_size),
    )
}

fn bench_job_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_throughput");
    for jobs in [10_u64, 100] {
        group.throughput(Throughput::Elements(jobs));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &jobs, |b, &jobs| {
            b.to_async(Runtime::new().unwrap()).iter(|| async move {
                let fleet = fleet(4);
                let handles: Vec<_> = (0..jobs)
                    .map(|i| {
                        fleet.submit(move |shell| async move {
                            Ok(shell.exec(ShellCommand::new(format!("echo {i}"))).await?)
                        })
                    })
                    .collect();
                for handle in handles {
                    black_box(handle.await.unwrap());
                }
                fleet.shutdown().await;
            });
        });
    }
    group.finish();
}

criterion_group!(sizing_benches, bench_desired_size, bench_backoff);
criterion_group!(scheduler_benches, bench_job_throughput);
criterion_main!(sizing_benches, scheduler_benches);
