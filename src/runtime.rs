use super::{
    handle::UNKNOWN_METHOD_ERROR,
    task::{Failure, Message, Request, Response, SerializedError, Task, TaskOutput},
    transfer::{get_task_transfer_list, TransferList},
    transport::{panic_message, Port, TERMINATED_EXIT_CODE},
};
use std::{
    collections::HashMap,
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
};
use futures::{
    future::{self, BoxFuture},
    stream::{FuturesUnordered, StreamExt},
    FutureExt,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};


pub type HandlerFuture = BoxFuture<'static, anyhow::Result<TaskOutput>>;
type Handler = Arc<dyn Fn(Task) -> HandlerFuture + Send + Sync>;

/// Ответ, который воркер отправит координатору
pub type Reply = (Message, TransferList);


/// Значение, "брошенное" обработчиком, которое не является ошибкой.
/// Уходит вызывающему как есть, без структурной сериализации.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct ThrownValue(pub Value);


impl From<()> for TaskOutput {
    fn from(_: ()) -> Self {
        TaskOutput::default()
    }
}

impl From<Option<TaskOutput>> for TaskOutput {
    fn from(output: Option<TaskOutput>) -> Self {
        output.unwrap_or_default()
    }
}


/// Сторона воркера: реестр методов и обработка входящих задач
#[derive(Clone, Default)]
pub struct WorkerRuntime {
    methods: HashMap<String, Handler>,
}

impl WorkerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует асинхронный обработчик под именем метода
    pub fn method<F, Fut, R>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<TaskOutput> + 'static,
    {
        let handler: Handler = Arc::new(move |task: Task| {
            handler(task).map(|res| res.map(Into::into)).boxed()
        });
        self.methods.insert(name.into(), handler);
        self
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Обрабатывает одно входящее сообщение.
    ///
    /// `None` для всего, что не является задачей. Иначе future, которая
    /// вернёт ответ или ошибку с тем же id.
    pub fn handle(&self, message: Message) -> Option<BoxFuture<'static, Reply>> {
        let request = match message {
            Message::Request(request) => request,
            other => {
                trace!(message = ?other, "ignoring non-task message");
                return None;
            }
        };

        let Some(handler) = self.methods.get(&request.method).cloned() else {
            debug!(method = %request.method, "undefined method requested");
            let error = SerializedError::new(
                UNKNOWN_METHOD_ERROR,
                format!("Undefined method: {}", request.method),
            );
            let reply = Message::Failure {
                id: request.id,
                error: Failure::Error(error),
            };
            return Some(future::ready((reply, Vec::new())).boxed());
        };

        Some(invoke(handler, request).boxed())
    }

    /// Основной цикл воркера. Возвращает код выхода.
    pub async fn run(
        self,
        mut inbound: mpsc::UnboundedReceiver<Message>,
        port: Port,
        cancel_token: CancellationToken,
    ) -> i32 {
        let mut in_flight = FuturesUnordered::new();

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => return TERMINATED_EXIT_CODE,
                Some((reply, transfer)) = in_flight.next(), if !in_flight.is_empty() => {
                    if port.post(reply, transfer).is_err() {
                        warn!("coordinator channel closed, stopping worker");
                        return TERMINATED_EXIT_CODE;
                    }
                }
                message = inbound.recv() => match message {
                    None | Some(Message::Shutdown) => break,
                    Some(message) => {
                        if let Some(fut) = self.handle(message) {
                            in_flight.push(fut);
                        }
                    }
                },
            }
        }

        // Доделываем начатые задачи, пока не отменили принудительно
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => return TERMINATED_EXIT_CODE,
                next = in_flight.next() => match next {
                    Some((reply, transfer)) => {
                        let _ = port.post(reply, transfer);
                    }
                    None => return 0,
                },
            }
        }
    }
}


async fn invoke(handler: Handler, request: Request) -> Reply {
    let id = request.id.clone();
    let method = request.method.clone();
    let task = request.into_task();

    let outcome = AssertUnwindSafe(async move { handler(task).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(mut output)) => {
            let transfer = get_task_transfer_list(&mut output.buffers);
            let reply = Message::Response(Response {
                id,
                data: output.data,
                buffers: output.buffers,
            });
            (reply, transfer)
        }
        Ok(Err(error)) => {
            debug!(method = %method, task = %id, error = %error, "handler failed");
            (Message::Failure { id, error: serialize_error(error) }, Vec::new())
        }
        Err(panic_info) => {
            warn!(method = %method, task = %id, "handler panicked");
            let error = SerializedError::new("Panic", panic_message(&*panic_info));
            (Message::Failure { id, error: Failure::Error(error) }, Vec::new())
        }
    }
}

/// Ошибки сериализуются структурно, брошенные значения передаются как есть
pub fn serialize_error(error: anyhow::Error) -> Failure {
    match error.downcast::<ThrownValue>() {
        Ok(ThrownValue(value)) => Failure::Value(value),
        Err(error) => Failure::Error(SerializedError {
            name: "Error".to_string(),
            message: error.to_string(),
            stack: Some(format!("{:?}", error)),
        }),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;

    #[test]
    fn test_serialize_error_keeps_message_and_chain() {
        let error = anyhow!("inner cause").context("outer failure");
        match serialize_error(error) {
            Failure::Error(e) => {
                assert_eq!(e.name, "Error");
                assert_eq!(e.message, "outer failure");
                assert!(e.stack.unwrap().contains("inner cause"));
            }
            other => panic!("Expected structured error, got {:?}", other),
        }
    }

    #[test]
    fn test_serialize_thrown_value_passes_through() {
        let error = anyhow::Error::new(ThrownValue(json!({"code": 7})));
        assert_eq!(serialize_error(error), Failure::Value(json!({"code": 7})));
    }
}
