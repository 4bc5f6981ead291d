// Acquire/release overhead with an in-memory resource (no I/O).

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use lazy_pool::{MemoryFactory, PoolConfiguration, ResourcePool};

fn uncontended_connect_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("failed to build runtime");
    let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(16))
        .expect("failed to create pool");
    rt.block_on(pool.ready()).expect("pool failed to initialize");

    c.bench_function("connect_release", |b| {
        b.to_async(&rt).iter(|| async {
            let conn = pool.connect().await.expect("connect failed");
            black_box(conn.id());
        });
    });
}

fn contended_connect_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("failed to build runtime");
    let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(2))
        .expect("failed to create pool");

    c.bench_function("contended_connect_release_8_tasks", |b| {
        b.to_async(&rt).iter(|| async {
            let mut handles = Vec::with_capacity(8);
            for _ in 0..8 {
                let pool = pool.clone();
                handles.push(tokio::spawn(async move {
                    let conn = pool.connect().await.expect("connect failed");
                    black_box(conn.id());
                }));
            }
            for handle in handles {
                handle.await.expect("task panicked");
            }
        });
    });
}

criterion_group!(benches, uncontended_connect_release, contended_connect_release);
criterion_main!(benches);
