use taskfabric_db_pool::DbPoolError;
use taskfabric_fault_tolerance::FaultToleranceError;
use taskfabric_scheduler::SchedulerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    FaultTolerance(#[from] FaultToleranceError),

    #[error(transparent)]
    DbPool(#[from] DbPoolError),
}

pub type ClusterResult<T> = Result<T, ClusterError>;
