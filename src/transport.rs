use super::{
    errors::PoolError,
    result::PoolResult,
    runtime::WorkerRuntime,
    task::Message,
    transfer::{transfer_size, TransferList},
};
use std::{
    panic::AssertUnwindSafe,
    sync::Arc,
    thread,
};
use futures::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};


pub type WorkerId = u64;

/// Код выхода воркера, остановленного принудительно
pub const TERMINATED_EXIT_CODE: i32 = 1;

/// Точка входа воркера: строит его runtime уже внутри потока воркера
pub type WorkerEntry = Arc<dyn Fn() -> WorkerRuntime + Send + Sync + 'static>;


/// Всё, что приходит от воркера координатору
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Message(Message),
    Exited(i32),
    Errored(String),
}

/// Канал координатора к одному воркеру
pub trait Transport: Send + Sync + 'static {
    /// Отправить сообщение; `transfer` перечисляет регионы памяти, которые перемещаются
    fn post(&self, message: Message, transfer: TransferList) -> PoolResult<()>;

    /// Принудительно остановить воркер и вернуть его код выхода
    fn terminate(&self) -> BoxFuture<'static, i32>;
}


/// Обратная сторона канала, которой пользуется воркер
#[derive(Debug, Clone)]
pub struct Port {
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Port {
    pub fn new(events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self { events }
    }

    pub fn post(&self, message: Message, transfer: TransferList) -> PoolResult<()> {
        trace!(
            id = message.id().unwrap_or("-"),
            transferred = transfer.len(),
            bytes = transfer_size(&transfer),
            "worker posting message"
        );
        self.events
            .send(WorkerEvent::Message(message))
            .map_err(|_| PoolError::ChannelClosed)
    }

    fn signal(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }
}


/// Воркер в отдельном потоке ОС со своим однопоточным tokio runtime
pub struct ThreadTransport {
    id: WorkerId,
    inbound: mpsc::UnboundedSender<Message>,
    cancel_token: CancellationToken,
    thread: Mutex<Option<thread::JoinHandle<i32>>>,
}

impl ThreadTransport {
    pub fn spawn(
        id: WorkerId,
        entry: WorkerEntry,
    ) -> PoolResult<(Self, mpsc::UnboundedReceiver<WorkerEvent>)> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let port = Port::new(events_tx);

        let thread = thread::Builder::new()
            .name(format!("async-worker-{}", id))
            .spawn(move || {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    let rt = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()?;
                    let runtime = entry();
                    Ok::<_, std::io::Error>(rt.block_on(runtime.run(inbound_rx, port.clone(), token)))
                }));

                let code = match outcome {
                    Ok(Ok(code)) => code,
                    Ok(Err(e)) => {
                        port.signal(WorkerEvent::Errored(e.to_string()));
                        TERMINATED_EXIT_CODE
                    }
                    Err(panic_info) => {
                        port.signal(WorkerEvent::Errored(panic_message(&*panic_info)));
                        TERMINATED_EXIT_CODE
                    }
                };
                port.signal(WorkerEvent::Exited(code));
                code
            })
            .map_err(|e| PoolError::Create(e.to_string()))?;

        Ok((
            Self {
                id,
                inbound: inbound_tx,
                cancel_token,
                thread: Mutex::new(Some(thread)),
            },
            events_rx,
        ))
    }

    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }
}

impl Transport for ThreadTransport {
    fn post(&self, message: Message, transfer: TransferList) -> PoolResult<()> {
        // Bytes внутри сообщения уже разделяют память, список нужен только для учёта
        trace!(
            worker = self.id,
            transferred = transfer.len(),
            bytes = transfer_size(&transfer),
            "posting message to worker"
        );
        self.inbound.send(message).map_err(|_| PoolError::ChannelClosed)
    }

    fn terminate(&self) -> BoxFuture<'static, i32> {
        self.cancel_token.cancel();
        let thread = self.thread.lock().take();
        let id = self.id;

        async move {
            let Some(thread) = thread else {
                return TERMINATED_EXIT_CODE;
            };
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(code)) => code,
                Ok(Err(_)) | Err(_) => {
                    warn!(worker = id, "worker thread did not join cleanly");
                    TERMINATED_EXIT_CODE
                }
            }
        }
        .boxed()
    }
}

impl Drop for ThreadTransport {
    fn drop(&mut self) {
        // Хэндл бросили без destroy: поток воркера останавливается сам
        self.cancel_token.cancel();
    }
}


pub(crate) fn panic_message(panic_info: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        format!("{:?}", panic_info)
    }
}
