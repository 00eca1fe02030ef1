use taskfabric_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum DbPoolError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("timed out waiting for a connection")]
    Timeout,

    #[error("connection pool exhausted")]
    PoolExhausted,

    #[error("connection pool closed")]
    PoolClosed,

    #[error("no endpoint is currently available")]
    EndpointUnavailable,

    #[error("backend error: {0}")]
    BackendError(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type DbPoolResult<T> = Result<T, DbPoolError>;
