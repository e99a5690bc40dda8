use super::task::Failure;
use thiserror::Error;


#[derive(Debug, PartialEq, Clone, Error)]
pub enum PoolError {
    #[error("Undefined method: {0}")]
    UnknownMethod(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Handler failed: {0}")]
    Handler(Failure),

    #[error("Worker exited with code {0}")]
    WorkerExited(i32),

    #[error("Worker errored: {0}")]
    WorkerErrored(String),

    #[error("Failed to create worker: {0}")]
    Create(String),

    #[error("Pool is draining")]
    Draining,

    #[error("Timed out waiting for a free worker")]
    AcquireTimeout,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Task has no correlation id")]
    MissingId,

    #[error("Malformed envelope: {0}")]
    Malformed(String),
}

impl PoolError {
    /// Стабильный код ошибки, по которому вызывающий выбирает политику повторов
    pub fn code(&self) -> &'static str {
        match self {
            PoolError::UnknownMethod(_) => "UNKNOWN_METHOD",
            PoolError::DeadlineExceeded => "DEADLINE_EXCEEDED",
            PoolError::Handler(_) => "HANDLER_FAILURE",
            PoolError::WorkerExited(_) | PoolError::WorkerErrored(_) => "WORKER_LIFECYCLE",
            PoolError::Create(_) => "CREATE_FAILED",
            PoolError::Draining => "POOL_DRAINING",
            PoolError::AcquireTimeout => "ACQUIRE_TIMEOUT",
            PoolError::ChannelClosed => "CHANNEL_CLOSED",
            PoolError::MissingId => "MISSING_ID",
            PoolError::Malformed(_) => "MALFORMED_ENVELOPE",
        }
    }

    #[inline]
    pub fn is_deadline(&self) -> bool {
        matches!(self, PoolError::DeadlineExceeded)
    }
}
