//! # Admission Benchmarks
//!
//! Hot-path costs of admission, telemetry harvesting and pool submission.
//!
//! Run with: `cargo bench`

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use metricstream::{
    AdmissionConfig, AdmissionController, DecisionEvent, ManualClock, NullSink, PoolConfig,
    TelemetryRing, WorkerPool,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn controller(max: usize, clock: Arc<ManualClock>) -> Arc<AdmissionController> {
    Arc::new(
        AdmissionController::with_parts(AdmissionConfig::per_second(max), Arc::new(NullSink), clock)
            .unwrap(),
    )
}

/// Benchmark one client, window in steady state
fn bench_single_client(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_client");

    for max in [10, 1000, 100_000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(max), &max, |b, &max| {
            let clock = Arc::new(ManualClock::new());
            let controller = controller(max, clock.clone());

            b.iter(|| {
                // 1µs per request keeps both admit and prune paths busy
                clock.advance(Duration::from_micros(1));
                std::hint::black_box(controller.allow_request("client"))
            });

            // Keep rings from piling up between samples
            controller.flush_metrics();
        });
    }

    group.finish();
}

/// Benchmark many clients spread over the index shards
fn bench_many_clients(c: &mut Criterion) {
    let mut group = c.benchmark_group("many_clients");

    for clients in [100, 10_000] {
        let ids: Vec<String> = (0..clients).map(|i| format!("client-{i}")).collect();

        group.throughput(Throughput::Elements(clients as u64));
        group.bench_with_input(BenchmarkId::from_parameter(clients), &ids, |b, ids| {
            let clock = Arc::new(ManualClock::new());
            let controller = controller(1000, clock.clone());

            b.iter(|| {
                clock.advance(Duration::from_micros(1));
                for id in ids {
                    std::hint::black_box(controller.allow_request(id));
                }
            });
        });
    }

    group.finish();
}

/// Benchmark admission under thread contention
fn bench_concurrent_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_admission");

    for (label, shared_client) in [("same_client", true), ("own_client", false)] {
        for num_threads in [4, 16] {
            group.throughput(Throughput::Elements(num_threads as u64 * 1000));
            group.bench_function(format!("{label}/{num_threads}_threads"), |b| {
                b.iter_custom(|iters| {
                    let mut total_duration = Duration::ZERO;

                    for _ in 0..iters {
                        let controller = controller(1_000_000, Arc::new(ManualClock::new()));
                        let start = std::time::Instant::now();

                        let handles: Vec<_> = (0..num_threads)
                            .map(|t| {
                                let controller = controller.clone();
                                let id = if shared_client {
                                    "shared".to_string()
                                } else {
                                    format!("client-{t}")
                                };
                                thread::spawn(move || {
                                    for _ in 0..1000 {
                                        controller.allow_request(&id);
                                    }
                                })
                            })
                            .collect();

                        for handle in handles {
                            handle.join().unwrap();
                        }

                        total_duration += start.elapsed();
                    }

                    total_duration
                });
            });
        }
    }

    group.finish();
}

/// Benchmark recording into and harvesting from a ring
fn bench_telemetry(c: &mut Criterion) {
    let mut group = c.benchmark_group("telemetry");

    group.throughput(Throughput::Elements(1));
    group.bench_function("record", |b| {
        let ring = TelemetryRing::with_capacity(1000);
        let mut now = 0u64;
        b.iter(|| {
            now += 1;
            ring.record(DecisionEvent::new(now, true));
        });
    });

    for filled in [100, 1000] {
        group.throughput(Throughput::Elements(filled));
        group.bench_with_input(BenchmarkId::new("drain", filled), &filled, |b, &filled| {
            b.iter_batched(
                || {
                    let ring = TelemetryRing::with_capacity(1000);
                    for i in 0..filled {
                        ring.record(DecisionEvent::new(i, i % 2 == 0));
                    }
                    ring
                },
                |ring| std::hint::black_box(ring.drain()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark a full flush across many clients
fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush");

    for clients in [10, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(clients), &clients, |b, &clients| {
            b.iter_batched(
                || {
                    let controller = controller(100, Arc::new(ManualClock::new()));
                    for i in 0..clients {
                        let id = format!("client-{i}");
                        for _ in 0..10 {
                            controller.allow_request(&id);
                        }
                    }
                    controller
                },
                |controller| std::hint::black_box(controller.flush_metrics()),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

/// Benchmark pool submission, accepted and refused
fn bench_pool_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_enqueue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("accepted", |b| {
        let pool = WorkerPool::new(PoolConfig::new(4, 1_000_000)).unwrap();
        b.iter(|| std::hint::black_box(pool.enqueue(|| {})));
        pool.shutdown();
    });

    group.bench_function("refused", |b| {
        let pool = WorkerPool::new(PoolConfig::new(1, 1)).unwrap();
        pool.shutdown();
        b.iter(|| std::hint::black_box(pool.enqueue(|| {})));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_client,
    bench_many_clients,
    bench_concurrent_admission,
    bench_telemetry,
    bench_flush,
    bench_pool_enqueue,
);

criterion_main!(benches);
