//! Пул воркеров-потоков с протоколом запрос/ответ поверх каналов
//!
//! # Features
//! - Ограниченный пул с FIFO-очередью ожидающих и проверкой при выдаче
//! - Корреляция ответов по id и дедлайны на каждый запрос
//! - Передача бинарных полезных нагрузок без копирования
//! - Ошибки обработчиков возвращаются вызывающему типизированными
//! - Drain/clear для корректной остановки

pub mod dispatch;
pub mod errors;
pub mod handle;
pub mod logging;
pub mod model;
pub mod pool;
pub mod result;
pub mod runtime;
pub mod task;
pub mod transfer;
pub mod transport;

pub use dispatch::{create_worker_pool, generate_id, Method, WorkerManager, WorkerPool};
pub use errors::PoolError;
pub use handle::{WorkerHandle, WorkerStatus};
pub use pool::{Manager, PoolConfig, ResourcePool};
pub use result::PoolResult;
pub use runtime::{ThrownValue, WorkerRuntime};
pub use task::{BufferValue, Message, Response, Task, TaskOutput};
pub use transfer::get_task_transfer_list;
