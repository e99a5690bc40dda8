use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use async_workers::{
    create_worker_pool,
    pool::{Manager, PoolConfig, ResourcePool},
    result::PoolResult,
    runtime::WorkerRuntime,
    task::{Task, TaskOutput},
};
use futures::future::{self, join_all, BoxFuture, FutureExt};
use std::hint::black_box;

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .unwrap()
}

fn sum_worker() -> WorkerRuntime {
    WorkerRuntime::new().method("sum", |task: Task| async move {
        let a = task.data.get("a").and_then(|v| v.as_u64()).unwrap_or(0);
        let b = task
            .buffer("b")
            .and_then(|b| b.get(..4))
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64)
            .unwrap_or(0);
        Ok(TaskOutput::new().with_data("c", a + b))
    })
}

struct Noop;

impl Manager for Noop {
    type Resource = u64;

    fn create(&self) -> BoxFuture<'_, PoolResult<u64>> {
        future::ready(Ok(0)).boxed()
    }

    fn validate(&self, _resource: &u64) -> bool {
        true
    }

    fn destroy(&self, _resource: u64) -> BoxFuture<'_, PoolResult<()>> {
        future::ready(Ok(())).boxed()
    }
}

// Benchmark 1: накладные расходы пула без воркеров
fn bench_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("acquire_release");
    let rt = create_runtime();

    for size in [1usize, 4, 16] {
        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(BenchmarkId::new("pool_size", size), &size, |b, &size| {
            let pool = ResourcePool::new(Noop, PoolConfig::fixed(size));

            b.to_async(&rt).iter(|| {
                let pool = pool.clone();
                async move {
                    let calls = (0..1000).map(|_| {
                        let pool = pool.clone();
                        async move {
                            let member = pool.acquire().await.unwrap();
                            pool.release(black_box(member));
                        }
                    });
                    join_all(calls).await;
                }
            });
        });
    }
    group.finish();
}

// Benchmark 2: полный круг запрос/ответ через потоки воркеров
fn bench_sum_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("sum_dispatch");
    let rt = create_runtime();

    for workers in [1usize, 4] {
        let pool = rt
            .block_on(create_worker_pool(sum_worker, PoolConfig::fixed(workers)))
            .unwrap();
        let sum = pool.get_method("sum");

        for batch in [1usize, 100] {
            group.throughput(Throughput::Elements(batch as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("workers_{}", workers), batch),
                &batch,
                |b, &batch| {
                    b.to_async(&rt).iter(|| {
                        let sum = sum.clone();
                        async move {
                            let calls = (0..batch).map(|i| {
                                let sum = sum.clone();
                                async move {
                                    let task = Task::new()
                                        .with_data("a", i as u64)
                                        .with_buffer("b", 2u32.to_le_bytes().to_vec());
                                    black_box(sum.call(task).await.unwrap())
                                }
                            });
                            join_all(calls).await;
                        }
                    });
                },
            );
        }

        rt.block_on(async {
            pool.drain().await;
            pool.clear().await;
        });
    }
    group.finish();
}

criterion_group!(benches, bench_acquire_release, bench_sum_dispatch);
criterion_main!(benches);
