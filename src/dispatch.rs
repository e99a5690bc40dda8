use super::{
    handle::WorkerHandle,
    pool::{Manager, PoolConfig, ResourcePool, SharedPool},
    result::PoolResult,
    runtime::WorkerRuntime,
    task::{Response, Task},
    transport::{ThreadTransport, WorkerEntry, WorkerId},
};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};
use futures::{future::BoxFuture, FutureExt};
use tracing::debug;


pub type WorkerPool = SharedPool<WorkerManager>;


/// Практически уникальный id: время, случайная часть и id воркера
pub fn generate_id(worker: WorkerId) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{}-{:x}-{}", millis, rand::random::<u64>(), worker)
}


/// Порождает воркеры-потоки и следит за их здоровьем
pub struct WorkerManager {
    entry: WorkerEntry,
    next_id: AtomicU64,
}

impl WorkerManager {
    pub fn new<F>(entry: F) -> Self
    where
        F: Fn() -> WorkerRuntime + Send + Sync + 'static,
    {
        Self {
            entry: Arc::new(entry),
            next_id: AtomicU64::new(0),
        }
    }
}

impl Manager for WorkerManager {
    type Resource = WorkerHandle;

    fn create(&self) -> BoxFuture<'_, PoolResult<WorkerHandle>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = self.entry.clone();

        async move {
            let (transport, events) = ThreadTransport::spawn(id, entry)?;
            debug!(worker = id, "worker thread spawned");
            Ok(WorkerHandle::new(id, Arc::new(transport), events))
        }
        .boxed()
    }

    fn validate(&self, handle: &WorkerHandle) -> bool {
        !handle.status().is_terminal()
    }

    fn destroy(&self, handle: WorkerHandle) -> BoxFuture<'_, PoolResult<()>> {
        async move {
            let code = handle.destroy().await;
            debug!(worker = handle.id(), code, "worker destroyed");
            Ok(())
        }
        .boxed()
    }

    fn on_borrow(&self, handle: &WorkerHandle) {
        handle.mark_busy();
    }

    fn on_release(&self, handle: &WorkerHandle) {
        handle.mark_idle();
    }
}


/// Создаёт пул воркеров и поднимает `min` из них.
///
/// `entry` вызывается в потоке каждого нового воркера и строит его runtime.
pub async fn create_worker_pool<F>(entry: F, config: PoolConfig) -> PoolResult<WorkerPool>
where
    F: Fn() -> WorkerRuntime + Send + Sync + 'static,
{
    let pool = ResourcePool::new(WorkerManager::new(entry), config);
    pool.start().await?;
    Ok(pool)
}

impl ResourcePool<WorkerManager> {
    pub fn get_method(self: &Arc<Self>, name: impl Into<String>) -> Method {
        let name: String = name.into();
        Method {
            pool: Arc::clone(self),
            name: Arc::from(name),
        }
    }
}


/// Вызов одного удалённого метода через пул
#[derive(Clone)]
pub struct Method {
    pool: WorkerPool,
    name: Arc<str>,
}

impl Method {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, mut task: Task) -> PoolResult<Response> {
        let handle = self.pool.acquire().await?;
        if task.id.is_none() {
            task.id = Some(generate_id(handle.id()));
        }

        // При release_before воркер уже свободен для пула, а ответ всё равно
        // придёт через его таблицу ожидания
        let lease = if task.release_before {
            self.pool.release(handle.clone());
            None
        } else {
            Some(Lease { pool: &self.pool, handle: Some(handle.clone()) })
        };

        let result = handle.send_and_await(&self.name, task).await;
        drop(lease);
        result
    }
}


// Возвращает воркер в пул ровно один раз, в том числе при отмене вызова
struct Lease<'a> {
    pool: &'a WorkerPool,
    handle: Option<WorkerHandle>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_differs_per_worker() {
        let a = generate_id(0);
        let b = generate_id(1);
        assert_ne!(a, b);
        assert!(a.ends_with("-0"));
        assert!(b.ends_with("-1"));
    }

    #[test]
    fn test_generate_id_differs_for_same_worker() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| generate_id(7)).collect();
        assert_eq!(ids.len(), 1000);
    }
}
