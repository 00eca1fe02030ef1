//! Priority scheduling, placement policy, and retry coordination
//! (spec §2, §4.1, §4.4). Depends on `taskfabric-fault-tolerance` for
//! `NodeRegistry` but never the reverse.

pub mod error;
pub mod placement;
pub mod queue;
pub mod retry;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use placement::PlacementStrategy;
pub use queue::PriorityQueue;
pub use retry::{RetryCoordinator, TaskFailureRecord};
pub use scheduler::{RetryCallback, Scheduler, SchedulerConfig, SystemStatus};
