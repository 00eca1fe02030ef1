//! Scheduler-local error type (spec §7: NotFound, InvalidArgument,
//! Timeout, TaskExecutionError).

use taskfabric_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SchedulerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("timed out waiting for task {0}")]
    Timeout(String),

    #[error("task execution failed: {0}")]
    TaskExecutionError(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
