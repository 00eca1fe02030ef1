//! Shared data model for the taskfabric execution core.
//!
//! This crate has no background tasks and no locks of its own — it is
//! the plain-data layer that every other taskfabric crate builds on:
//! `Node`/`Task` records, the status state machines they carry, and the
//! capability-matching rule the scheduler uses to build a placement
//! candidate set.

pub mod capability;
pub mod error;
pub mod node;
pub mod task;

pub use capability::can_handle;
pub use error::{CoreError, CoreResult};
pub use node::{CapabilityValue, FailureKind, Node, NodeId, NodeStatus};
pub use task::{RequiredResource, Task, TaskArgs, TaskCallable, TaskId, TaskStatus};
