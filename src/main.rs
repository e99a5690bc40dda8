use async_workers::{
    create_worker_pool,
    logging::{self, LogConfig},
    PoolConfig, Task, TaskOutput, WorkerRuntime,
};
use futures::future::join_all;
use tokio::runtime::Builder;
use std::time::Instant;


fn sum_worker() -> WorkerRuntime {
    WorkerRuntime::new().method("sum", |task: Task| async move {
        let a = task.data.get("a").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let b = task
            .buffer("b")
            .and_then(|b| b.get(..4))
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .unwrap_or(0);
        let c = a + b;
        Ok(TaskOutput::new()
            .with_data("c", c)
            .with_buffer("c", c.to_le_bytes().to_vec()))
    })
}

fn main() -> anyhow::Result<()> {
    logging::init(LogConfig::default().with_env_overrides());

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let now = Instant::now();
        let pool = create_worker_pool(sum_worker, PoolConfig::default().with_env_overrides()).await?;
        let sum = pool.get_method("sum");

        let calls = (0..10_000u32).map(|i| {
            let sum = sum.clone();
            async move {
                sum.call(
                    Task::new()
                        .with_data("a", i)
                        .with_buffer("b", 1u32.to_le_bytes().to_vec()),
                )
                .await
            }
        });
        let failed = join_all(calls).await.into_iter().filter(|r| r.is_err()).count();

        pool.drain().await;
        pool.clear().await;
        println!("elapsed: {:?}, failed: {}", now.elapsed(), failed);
        Ok::<(), anyhow::Error>(())
    })
}
