#[cfg(test)]
mod tests {
    use async_workers::{
        create_worker_pool,
        errors::PoolError,
        pool::{Manager, PoolConfig, ResourcePool},
        result::PoolResult,
        runtime::WorkerRuntime,
        task::{Task, TaskOutput},
    };
    use futures::future::{self, join_all, BoxFuture, FutureExt};
    use serde_json::json;
    use std::{
        future::Future,
        sync::atomic::{AtomicUsize, Ordering},
        time::{Duration, Instant},
    };
    use tokio::sync::mpsc;

    async fn measure<F, Fut, T>(name: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let start = Instant::now();
        let result = f().await;
        let elapsed = start.elapsed();
        println!("✓ {}: {:?}", name, elapsed);
        result
    }

    /// Считает одновременно выданных участников
    #[derive(Default)]
    struct TrackingManager {
        created: AtomicUsize,
        borrowed: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Manager for TrackingManager {
        type Resource = usize;

        fn create(&self) -> BoxFuture<'_, PoolResult<usize>> {
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(self.created.fetch_add(1, Ordering::SeqCst))
            }
            .boxed()
        }

        fn validate(&self, _resource: &usize) -> bool {
            true
        }

        fn destroy(&self, _resource: usize) -> BoxFuture<'_, PoolResult<()>> {
            future::ready(Ok(())).boxed()
        }

        fn on_borrow(&self, _resource: &usize) {
            let now = self.borrowed.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn on_release(&self, _resource: &usize) {
            self.borrowed.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn sum_worker() -> WorkerRuntime {
        WorkerRuntime::new().method("sum", |task: Task| async move {
            let a = task.data.get("a").and_then(|v| v.as_u64()).unwrap_or(0);
            let b = task.data.get("b").and_then(|v| v.as_u64()).unwrap_or(0);
            Ok(TaskOutput::new().with_data("c", a + b))
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn load_test_1_bounded_under_contention() {
        println!("\n=== LOAD TEST 1: 200 конкурентов на пул из 8 ===");
        let pool = ResourcePool::new(TrackingManager::default(), PoolConfig::elastic(0, 8));

        let results = measure("200 acquire/release", || async {
            let calls = (0..200).map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    let member = pool.acquire().await?;
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    pool.release(member);
                    Ok::<_, PoolError>(())
                })
            });
            join_all(calls).await
        })
        .await;

        assert!(results.into_iter().all(|r| matches!(r, Ok(Ok(())))));
        let manager = pool.manager();
        assert_eq!(manager.created.load(Ordering::SeqCst), 8);
        assert!(manager.peak.load(Ordering::SeqCst) <= 8);

        let metrics = pool.metrics();
        assert_eq!(metrics.size, 8);
        assert_eq!(metrics.borrowed, 0);
        assert_eq!(metrics.pending, 0);
        println!("  Пик выданных: {}", manager.peak.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn load_test_2_fifo_under_pressure() {
        println!("\n=== LOAD TEST 2: FIFO для 50 ожидающих ===");
        let pool = ResourcePool::new(TrackingManager::default(), PoolConfig::fixed(1));
        let held = pool.acquire().await.unwrap();

        let (order_tx, mut order_rx) = mpsc::unbounded_channel();
        for i in 0..50 {
            let task_pool = pool.clone();
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                let member = task_pool.acquire().await.unwrap();
                order_tx.send(i).unwrap();
                task_pool.release(member);
            });
            while pool.metrics().pending != i + 1 {
                tokio::task::yield_now().await;
            }
        }

        pool.release(held);
        let mut order = Vec::with_capacity(50);
        for _ in 0..50 {
            order.push(order_rx.recv().await.unwrap());
        }
        assert_eq!(order, (0..50).collect::<Vec<_>>());
        println!("  ✓ Все 50 обслужены по порядку");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn load_test_3_many_calls_few_workers() {
        println!("\n=== LOAD TEST 3: 1000 вызовов sum на 4 воркерах ===");
        let pool = create_worker_pool(sum_worker, PoolConfig::fixed(4)).await.unwrap();
        let sum = pool.get_method("sum");

        let results = measure("1000 sum calls", || async {
            let calls = (0..1000u64).map(|i| {
                let sum = sum.clone();
                async move {
                    sum.call(Task::new().with_data("a", i).with_data("b", 1)).await
                }
            });
            join_all(calls).await
        })
        .await;

        for (i, result) in results.iter().enumerate() {
            let response = result.as_ref().unwrap();
            assert_eq!(response.data["c"], json!(i as u64 + 1));
        }

        let metrics = pool.metrics();
        assert_eq!(metrics.created, 4);
        assert_eq!(metrics.borrowed, 0);
        println!("  Воркеров создано: {}", metrics.created);

        pool.drain().await;
        pool.clear().await;
        assert_eq!(pool.metrics().size, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn load_test_4_release_before_burst() {
        println!("\n=== LOAD TEST 4: release_before при высокой нагрузке ===");
        let pool = create_worker_pool(sum_worker, PoolConfig::fixed(2)).await.unwrap();
        let sum = pool.get_method("sum");

        let results = join_all((0..500u64).map(|i| {
            let sum = sum.clone();
            async move {
                sum.call(Task::new().release_before().with_data("a", i)).await
            }
        }))
        .await;

        let failures = results.iter().filter(|r| r.is_err()).count();
        assert_eq!(failures, 0);
        assert_eq!(pool.metrics().created, 2);

        pool.drain().await;
        pool.clear().await;
        println!("  ✓ 500 вызовов без ошибок");
    }
}
