//! Fan-out benchmarks for Beacon.
//!
//! These benchmarks measure delivery through the hub coordinator and the
//! registry operations underneath it.

use beacon_bench::{drain, register_connections, status_event};
use beacon_core::{outbox, ConnectionKey, Hub, Identity, Registry};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Instant;
use tokio::runtime::Runtime;

/// Benchmark registry add + remove.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("add_remove", |b| {
        let registry = Registry::new();
        let identity = Identity::new("user-1");
        b.iter(|| {
            let (handle, _rx) = outbox(ConnectionKey::new(identity.clone()), 1);
            let key = handle.key().clone();
            registry.add(handle);
            black_box(registry.remove(&key))
        });
    });

    group.bench_function("is_online_1000", |b| {
        let registry = Registry::new();
        let _rxs: Vec<_> = (0..1000)
            .map(|i| {
                let (handle, rx) = outbox(ConnectionKey::new(Identity::new(format!("user-{}", i))), 1);
                registry.add(handle);
                rx
            })
            .collect();
        let probe = Identity::new("user-500");

        b.iter(|| registry.is_online(black_box(&probe)));
    });

    group.finish();
}

/// Benchmark one delivery to many identities, including the coordinator hop.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    let rt = Runtime::new().unwrap();

    for size in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let hub = Hub::spawn();
                    let (targets, mut outboxes) = register_connections(&hub, size, 1, 256);
                    let event = status_event();
                    hub.flush().await;

                    let start = Instant::now();
                    for _ in 0..iters {
                        hub.deliver(targets.iter().cloned(), event.clone());
                        hub.flush().await;
                        drain(&mut outboxes);
                    }
                    start.elapsed()
                })
            });
        });
    }

    group.finish();
}

/// Benchmark delivery to one identity holding several connections.
fn bench_multi_connection(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_connection");
    let rt = Runtime::new().unwrap();

    group.bench_function("one_identity_8_tabs", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let hub = Hub::spawn();
                let (targets, mut outboxes) = register_connections(&hub, 1, 8, 256);
                let event = status_event();
                hub.flush().await;

                let start = Instant::now();
                for _ in 0..iters {
                    hub.deliver(targets.iter().cloned(), event.clone());
                    hub.flush().await;
                    drain(&mut outboxes);
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_registry, bench_fanout, bench_multi_connection);
criterion_main!(benches);
