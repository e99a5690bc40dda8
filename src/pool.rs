use super::{
    errors::PoolError,
    result::PoolResult,
    model::PoolMetrics,
};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
};
use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use tokio::{
    sync::{oneshot, Notify},
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};


/// Конфигурация пула
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
    /// Проверять участника перед выдачей
    pub validate_on_borrow: bool,
    /// Период проверки простаивающих участников; `Duration::ZERO` отключает вытеснение
    pub eviction_interval: Duration,
    pub idle_timeout: Duration,
    /// Сколько ждать свободного участника, `None` означает без ограничения
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            min: num_cpus,
            max: num_cpus,
            validate_on_borrow: true,
            eviction_interval: Duration::ZERO,
            idle_timeout: Duration::from_secs(30),
            acquire_timeout: None,
        }
    }
}

impl PoolConfig {
    pub fn fixed(size: usize) -> Self {
        Self {
            min: size,
            max: size,
            ..Default::default()
        }
    }

    pub fn elastic(min: usize, max: usize) -> Self {
        Self {
            min,
            max,
            ..Default::default()
        }
    }

    pub fn with_eviction(mut self, interval: Duration, idle_timeout: Duration) -> Self {
        self.eviction_interval = interval;
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Переопределения из окружения:
    /// `ASYNC_WORKERS_MIN`, `ASYNC_WORKERS_MAX`, `ASYNC_WORKERS_ACQUIRE_TIMEOUT_MS`
    pub fn with_env_overrides(mut self) -> Self {
        fn read(key: &str) -> Option<u64> {
            let raw = std::env::var(key).ok()?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key, value = %raw, "ignoring malformed pool setting");
                    None
                }
            }
        }

        if let Some(min) = read("ASYNC_WORKERS_MIN") {
            self.min = min as usize;
        }
        if let Some(max) = read("ASYNC_WORKERS_MAX") {
            self.max = max as usize;
        }
        if let Some(ms) = read("ASYNC_WORKERS_ACQUIRE_TIMEOUT_MS") {
            self.acquire_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        self
    }

    fn normalized(mut self) -> Self {
        if self.max == 0 {
            warn!("pool max is zero, using 1");
            self.max = 1;
        }
        if self.min > self.max {
            warn!(min = self.min, max = self.max, "pool min exceeds max, clamping");
            self.min = self.max;
        }
        self
    }
}


/// Жизненный цикл участников пула
pub trait Manager: Send + Sync + 'static {
    type Resource: Clone + Send + Sync + 'static;

    fn create(&self) -> BoxFuture<'_, PoolResult<Self::Resource>>;

    /// Здоров ли участник; вызывается лениво, при выдаче и при вытеснении
    fn validate(&self, resource: &Self::Resource) -> bool;

    fn destroy(&self, resource: Self::Resource) -> BoxFuture<'_, PoolResult<()>>;

    fn on_borrow(&self, _resource: &Self::Resource) {}

    fn on_release(&self, _resource: &Self::Resource) {}
}


/// Право на участника: готовый участник либо слот под создание нового
enum Grant<R> {
    Member(R),
    Create,
}

struct IdleMember<R> {
    resource: R,
    since: Instant,
}

struct PoolState<R> {
    idle: VecDeque<IdleMember<R>>,
    /// Живые участники плюс создаваемые
    size: usize,
    /// Выданные участники плюс слоты под создание
    borrowed: usize,
    waiters: VecDeque<oneshot::Sender<Grant<R>>>,
    draining: bool,
}

impl<R> PoolState<R> {
    fn open_waiters(&self) -> usize {
        self.waiters.iter().filter(|w| !w.is_closed()).count()
    }
}


pub type SharedPool<M> = Arc<ResourcePool<M>>;

#[inline(always)]
fn unlikely(b: bool) -> bool {
    #[cold]
    fn cold() {}
    if b { cold() }
    b
}

/// Пул ресурсов с ограничением сверху и FIFO-очередью ожидающих
pub struct ResourcePool<M: Manager> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Resource>>,
    drained: Notify,
    created_total: AtomicUsize,
    destroyed_total: AtomicUsize,
    eviction_token: Mutex<Option<CancellationToken>>,
}

impl<M: Manager> ResourcePool<M> {
    pub fn new(manager: M, config: PoolConfig) -> SharedPool<M> {
        let config = config.normalized();
        Arc::new(Self {
            manager,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(config.max),
                size: 0,
                borrowed: 0,
                waiters: VecDeque::new(),
                draining: false,
            }),
            config,
            drained: Notify::new(),
            created_total: AtomicUsize::new(0),
            destroyed_total: AtomicUsize::new(0),
            eviction_token: Mutex::new(None),
        })
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[inline]
    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Создаёт `min` участников и запускает вытеснение, если оно включено
    pub async fn start(self: &Arc<Self>) -> PoolResult<()> {
        self.ensure_minimum().await?;
        if !self.config.eviction_interval.is_zero() {
            self.start_eviction(self.config.eviction_interval);
        }
        info!(min = self.config.min, max = self.config.max, "pool started");
        Ok(())
    }

    async fn ensure_minimum(&self) -> PoolResult<()> {
        loop {
            {
                let mut state = self.state.lock();
                if state.draining || state.size >= self.config.min {
                    return Ok(());
                }
                state.size += 1;
            }

            match self.manager.create().await {
                Ok(resource) => {
                    self.created_total.fetch_add(1, Ordering::Relaxed);
                    let mut state = self.state.lock();
                    self.hand_off(&mut state, Grant::Member(resource), false);
                }
                Err(e) => {
                    self.state.lock().size -= 1;
                    return Err(e);
                }
            }
        }
    }

    /// Выдаёт проверенного участника, создаёт нового или ждёт в очереди
    pub async fn acquire(&self) -> PoolResult<M::Resource> {
        let mut grant = self.next_grant().await?;

        loop {
            let resource = match grant {
                Grant::Member(resource) => resource,
                Grant::Create => {
                    let slot = SlotGuard::new(self);
                    let resource = self.manager.create().await?;
                    slot.disarm();
                    self.created_total.fetch_add(1, Ordering::Relaxed);
                    debug!(size = self.state.lock().size, "created pool member");
                    resource
                }
            };

            if self.config.validate_on_borrow && unlikely(!self.manager.validate(&resource)) {
                debug!("member failed validation, replacing");
                let slot = SlotGuard::new(self);
                self.destroy_member(resource).await;
                slot.disarm();
                grant = Grant::Create;
                continue;
            }

            self.manager.on_borrow(&resource);
            return Ok(resource);
        }
    }

    async fn next_grant(&self) -> PoolResult<Grant<M::Resource>> {
        let rx = {
            let mut state = self.state.lock();
            if state.draining {
                return Err(PoolError::Draining);
            }
            if let Some(idle) = state.idle.pop_front() {
                state.borrowed += 1;
                return Ok(Grant::Member(idle.resource));
            }
            if state.size < self.config.max {
                state.size += 1;
                state.borrowed += 1;
                return Ok(Grant::Create);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        let mut waiting = Waiting { rx, pool: self, done: false };
        match self.config.acquire_timeout {
            None => waiting.recv().await,
            Some(timeout) => tokio::time::timeout(timeout, waiting.recv())
                .await
                .map_err(|_| PoolError::AcquireTimeout)?,
        }
    }

    /// Возвращает участника и будит самого старого ожидающего
    pub fn release(&self, resource: M::Resource) {
        self.manager.on_release(&resource);
        let mut state = self.state.lock();
        self.hand_off(&mut state, Grant::Member(resource), true);
    }

    /// Навсегда убирает выданного участника из пула
    pub async fn destroy(&self, resource: M::Resource) {
        self.destroy_member(resource).await;
        self.return_grant(Grant::Create);
    }

    /// Перестаёт выдавать новых участников и ждёт, пока все выданные вернутся
    pub async fn drain(&self) {
        self.state.lock().draining = true;
        self.stop_eviction();

        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.lock();
                if state.borrowed == 0 && state.open_waiters() == 0 {
                    break;
                }
            }
            notified.await;
        }
        debug!("pool drained");
    }

    /// Уничтожает всех простаивающих участников
    pub async fn clear(&self) {
        let members: Vec<_> = {
            let mut state = self.state.lock();
            let members: Vec<_> = state.idle.drain(..).collect();
            state.size -= members.len();
            members
        };

        let count = members.len();
        join_all(members.into_iter().map(|m| self.destroy_member(m.resource))).await;
        info!(destroyed = count, "pool cleared");
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        let state = self.state.lock();
        PoolMetrics {
            size: state.size,
            available: state.idle.len(),
            borrowed: state.borrowed,
            pending: state.open_waiters(),
            min: self.config.min,
            max: self.config.max,
            created: self.created_total.load(Ordering::Relaxed),
            destroyed: self.destroyed_total.load(Ordering::Relaxed),
        }
    }

    /// Мониторинг метрик с callback
    /// ВАЖНО: Вызовите token.cancel() для остановки мониторинга и освобождения памяти
    pub fn start_monitoring<F>(self: &Arc<Self>, interval: Duration, callback: F) -> CancellationToken
    where
        F: Fn(PoolMetrics) + Send + 'static,
    {
        let pool = Arc::clone(self);
        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        callback(pool.metrics());
                    }
                    _ = token_clone.cancelled() => {
                        drop(pool);
                        break;
                    }
                }
            }
        });

        token
    }

    /// Остановить мониторинг и дропнуть все ссылки
    pub fn stop_monitoring(token: CancellationToken) {
        token.cancel();
    }

    fn start_eviction(self: &Arc<Self>, interval: Duration) {
        let pool: Weak<Self> = Arc::downgrade(self);
        let token = CancellationToken::new();
        let token_clone = token.clone();
        if let Some(previous) = self.eviction_token.lock().replace(token) {
            previous.cancel();
        }

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let Some(pool) = pool.upgrade() else { break };
                        pool.evict_idle().await;
                    }
                    _ = token_clone.cancelled() => break,
                }
            }
        });
    }

    fn stop_eviction(&self) {
        if let Some(token) = self.eviction_token.lock().take() {
            token.cancel();
        }
    }

    /// Один проход вытеснения: больные и слишком долго простаивающие участники
    pub async fn evict_idle(&self) {
        let evicted: Vec<_> = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let mut keep = VecDeque::with_capacity(state.idle.len());
            let mut evicted = Vec::new();
            let mut size = state.size;

            for member in state.idle.drain(..) {
                let stale = now.duration_since(member.since) >= self.config.idle_timeout;
                if !self.manager.validate(&member.resource) || (stale && size > self.config.min) {
                    size -= 1;
                    evicted.push(member.resource);
                } else {
                    keep.push_back(member);
                }
            }
            state.idle = keep;
            state.size = size;
            evicted
        };

        if evicted.is_empty() {
            return;
        }
        debug!(evicted = evicted.len(), "evicting idle members");
        join_all(evicted.into_iter().map(|r| self.destroy_member(r))).await;

        if let Err(e) = self.ensure_minimum().await {
            warn!(error = %e, "failed to refill pool after eviction");
        }
    }

    async fn destroy_member(&self, resource: M::Resource) {
        if let Err(e) = self.manager.destroy(resource).await {
            warn!(error = %e, "failed to destroy pool member");
        }
        self.destroyed_total.fetch_add(1, Ordering::Relaxed);
    }

    fn return_grant(&self, grant: Grant<M::Resource>) {
        let mut state = self.state.lock();
        self.hand_off(&mut state, grant, true);
    }

    /// Передаёт право первому живому ожидающему, иначе кладёт его обратно в пул.
    /// `borrowed` говорит, учтено ли право в счётчике выданных.
    fn hand_off(&self, state: &mut PoolState<M::Resource>, mut grant: Grant<M::Resource>, borrowed: bool) {
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(grant) {
                Ok(()) => {
                    if !borrowed {
                        state.borrowed += 1;
                    }
                    return;
                }
                Err(returned) => grant = returned,
            }
        }

        if borrowed {
            state.borrowed -= 1;
        }
        match grant {
            Grant::Member(resource) => state.idle.push_back(IdleMember {
                resource,
                since: Instant::now(),
            }),
            Grant::Create => state.size -= 1,
        }
        if state.borrowed == 0 {
            self.drained.notify_waiters();
        }
    }
}


// Ожидание в очереди; если future бросили, полученное право возвращается в пул
struct Waiting<'a, M: Manager> {
    rx: oneshot::Receiver<Grant<M::Resource>>,
    pool: &'a ResourcePool<M>,
    done: bool,
}

impl<M: Manager> Waiting<'_, M> {
    async fn recv(&mut self) -> PoolResult<Grant<M::Resource>> {
        let grant = (&mut self.rx).await.map_err(|_| PoolError::ChannelClosed)?;
        self.done = true;
        Ok(grant)
    }
}

impl<M: Manager> Drop for Waiting<'_, M> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.rx.close();
        if let Ok(grant) = self.rx.try_recv() {
            self.pool.return_grant(grant);
        } else {
            // Закрытый ожидающий мог держать drain
            self.pool.drained.notify_waiters();
        }
    }
}

// Слот под создание, который освобождается, если создание не дошло до конца
struct SlotGuard<'a, M: Manager> {
    pool: &'a ResourcePool<M>,
    armed: bool,
}

impl<'a, M: Manager> SlotGuard<'a, M> {
    fn new(pool: &'a ResourcePool<M>) -> Self {
        Self { pool, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<M: Manager> Drop for SlotGuard<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.return_grant(Grant::Create);
        }
    }
}
