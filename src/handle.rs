use super::{
    errors::PoolError,
    result::PoolResult,
    task::{Failure, Message, Request, Response, Task},
    transfer::get_task_transfer_list,
    transport::{Transport, WorkerEvent, WorkerId},
};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};


/// Имя сериализованной ошибки, которой воркер отвечает на неизвестный метод
pub const UNKNOWN_METHOD_ERROR: &str = "UnknownMethod";

type PendingCall = oneshot::Sender<PoolResult<Response>>;


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Busy,
    Exited(i32),
    Errored(String),
}

impl WorkerStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerStatus::Exited(_) | WorkerStatus::Errored(_))
    }

    fn lifecycle_error(&self) -> Option<PoolError> {
        match self {
            WorkerStatus::Exited(code) => Some(PoolError::WorkerExited(*code)),
            WorkerStatus::Errored(e) => Some(PoolError::WorkerErrored(e.clone())),
            WorkerStatus::Idle | WorkerStatus::Busy => None,
        }
    }
}


struct HandleInner {
    id: WorkerId,
    transport: Arc<dyn Transport>,
    status: Mutex<WorkerStatus>,
    // Порядок блокировок: сначала pending, потом status
    pending: Mutex<HashMap<String, PendingCall>>,
    listener: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HandleInner {
    fn resolve(&self, id: &str, outcome: PoolResult<Response>) {
        let waiter = self.pending.lock().remove(id);
        match waiter {
            Some(tx) => {
                trace!(worker = self.id, task = id, "resolving pending call");
                let _ = tx.send(outcome);
            }
            None => {
                // Дедлайн уже сработал, слушателя нет
                trace!(worker = self.id, task = id, "dropping late response");
            }
        }
    }

    fn terminate_with(&self, status: WorkerStatus) {
        let Some(error) = status.lifecycle_error() else {
            return;
        };
        let mut pending = self.pending.lock();
        {
            let mut current = self.status.lock();
            if current.is_terminal() {
                return;
            }
            *current = status;
        }

        if !pending.is_empty() {
            warn!(
                worker = self.id,
                outstanding = pending.len(),
                error = %error,
                "worker stopped with calls in flight"
            );
        }
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(error.clone()));
        }
    }

    fn set_activity(&self, status: WorkerStatus) {
        let mut current = self.status.lock();
        if !current.is_terminal() {
            *current = status;
        }
    }
}


/// Хэндл одного воркера: статус, таблица ожидающих ответов и отправка задач
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<HandleInner>,
}

impl WorkerHandle {
    /// Оборачивает канал воркера и запускает слушателя его событий
    pub fn new(
        id: WorkerId,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> Self {
        let inner = Arc::new(HandleInner {
            id,
            transport,
            status: Mutex::new(WorkerStatus::Idle),
            pending: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
        });

        let listener = tokio::spawn(listen(Arc::downgrade(&inner), events));
        *inner.listener.lock() = Some(listener);

        Self { inner }
    }

    #[inline]
    pub fn id(&self) -> WorkerId {
        self.inner.id
    }

    pub fn status(&self) -> WorkerStatus {
        self.inner.status.lock().clone()
    }

    /// Число ожидающих ответа вызовов на этом воркере
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.inner.pending.lock().contains_key(id)
    }

    pub fn mark_busy(&self) {
        self.inner.set_activity(WorkerStatus::Busy);
    }

    pub fn mark_idle(&self) {
        self.inner.set_activity(WorkerStatus::Idle);
    }

    /// Отправляет задачу и ждёт ответ с тем же id либо срабатывания дедлайна.
    ///
    /// Запись в таблице ожидания разрешает гонку: кто первым её удалил
    /// (ответ или таймер), тот и завершает вызов.
    pub async fn send_and_await(&self, method: &str, mut task: Task) -> PoolResult<Response> {
        let id = task.id.clone().ok_or(PoolError::MissingId)?;
        let (tx, mut rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock();
            if let Some(error) = self.inner.status.lock().lifecycle_error() {
                return Err(error);
            }
            if pending.insert(id.clone(), tx).is_some() {
                warn!(worker = self.inner.id, task = %id, "correlation id reused while in flight");
            }
        }
        let _guard = PendingGuard { inner: self.inner.as_ref(), id: &id };

        let transfer = get_task_transfer_list(&mut task.buffers);
        let request = Message::Request(Request {
            id: id.clone(),
            method: method.to_string(),
            data: task.data,
            buffers: task.buffers,
        });
        self.inner.transport.post(request, transfer)?;
        trace!(worker = self.inner.id, task = %id, method, "task posted");

        let outcome = match task.deadline {
            None => (&mut rx).await,
            Some(deadline) => match tokio::time::timeout(deadline, &mut rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    if self.inner.pending.lock().remove(&id).is_some() {
                        debug!(
                            worker = self.inner.id,
                            task = %id,
                            deadline_ms = deadline.as_millis() as u64,
                            "deadline exceeded"
                        );
                        return Err(PoolError::DeadlineExceeded);
                    }
                    // Ответ успел забрать запись раньше таймера
                    rx.await
                }
            },
        };

        match outcome {
            Ok(Err(PoolError::Handler(Failure::Error(e)))) if e.name == UNKNOWN_METHOD_ERROR => {
                Err(PoolError::UnknownMethod(method.to_string()))
            }
            Ok(outcome) => outcome,
            Err(_) => Err(PoolError::ChannelClosed),
        }
    }

    /// Уведомление о завершении через канал воркера
    pub fn shutdown(&self) -> PoolResult<()> {
        self.inner.transport.post(Message::Shutdown, Vec::new())
    }

    /// Отключает слушателя; ожидающие вызовы получают `ChannelClosed`
    pub fn detach(&self) {
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
        self.inner.pending.lock().clear();
    }

    /// Мягкое уведомление, затем принудительная остановка; возвращает код выхода
    pub async fn destroy(&self) -> i32 {
        self.detach();
        if let Err(e) = self.shutdown() {
            trace!(worker = self.inner.id, error = %e, "shutdown notice not delivered");
        }
        let code = self.inner.transport.terminate().await;
        self.inner.terminate_with(WorkerStatus::Exited(code));
        code
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.pending_count();
        let status = self.status();
        f.debug_struct("WorkerHandle")
            .field("id", &self.inner.id)
            .field("status", &status)
            .field("pending", &pending)
            .finish()
    }
}


// Снимает запись, если вызывающий бросил future раньше времени
struct PendingGuard<'a> {
    inner: &'a HandleInner,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(self.id);
    }
}


// Слушатель не держит хэндл живым: когда последний клон уходит, транспорт
// закрывается и поток воркера завершается
async fn listen(inner: Weak<HandleInner>, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            WorkerEvent::Message(Message::Response(response)) => {
                let id = response.id.clone();
                inner.resolve(&id, Ok(response));
            }
            WorkerEvent::Message(Message::Failure { id, error }) => {
                inner.resolve(&id, Err(PoolError::Handler(error)));
            }
            WorkerEvent::Message(other) => {
                trace!(worker = inner.id, message = ?other, "ignoring uncorrelated message");
            }
            WorkerEvent::Exited(code) => {
                debug!(worker = inner.id, code, "worker exited");
                inner.terminate_with(WorkerStatus::Exited(code));
            }
            WorkerEvent::Errored(error) => {
                warn!(worker = inner.id, error = %error, "worker errored");
                inner.terminate_with(WorkerStatus::Errored(error));
            }
        }
    }
}
