use taskfabric_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum FaultToleranceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type FtResult<T> = Result<T, FaultToleranceError>;
