//! Task record, callable contract, and capability requirements.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::node::NodeId;

/// Opaque task identifier, generated at submission time.
pub type TaskId = Uuid;

/// Terminal-or-not lifecycle status of a task. See spec.md §4.3: a task
/// reaches exactly one terminal status (`Completed`, `Failed`,
/// `Cancelled`) and never mutates again after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

/// Positional and keyed arguments passed to a task's callable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskArgs {
    pub positional: Vec<serde_json::Value>,
    pub keyed: HashMap<String, serde_json::Value>,
}

/// A single required capability: either a numeric lower bound or a
/// required membership in a set-valued capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequiredResource {
    Numeric(f64),
    StringValue(String),
}

/// The injected unit of work a task wraps. Implementations are supplied
/// by the caller at submission time; the scheduler never constructs one
/// itself. Errors are captured as human-readable strings per spec.md §6
/// ("any raised error is captured into task.error as a human-readable
/// string").
#[async_trait]
pub trait TaskCallable: Send + Sync {
    async fn call(&self, args: &TaskArgs) -> Result<serde_json::Value, String>;
}

impl fmt::Debug for dyn TaskCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<task callable>")
    }
}

/// A unit of work tracked by the Task Registry.
#[derive(Clone)]
pub struct Task {
    pub id: TaskId,
    pub display_name: String,
    pub callable: Arc<dyn TaskCallable>,
    pub args: TaskArgs,
    /// Higher values are scheduled earlier.
    pub priority: i64,
    pub submit_time: Instant,
    pub start_time: Option<Instant>,
    pub complete_time: Option<Instant>,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub assigned_node_id: Option<NodeId>,
    pub estimated_duration: Option<Duration>,
    pub required_resources: HashMap<String, RequiredResource>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("assigned_node_id", &self.assigned_node_id)
            .finish()
    }
}

impl Task {
    pub fn new(
        display_name: impl Into<String>,
        callable: Arc<dyn TaskCallable>,
        args: TaskArgs,
        priority: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            callable,
            args,
            priority,
            submit_time: Instant::now(),
            start_time: None,
            complete_time: None,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            assigned_node_id: None,
            estimated_duration: None,
            required_resources: HashMap::new(),
        }
    }

    pub fn with_required_resources(mut self, reqs: HashMap<String, RequiredResource>) -> Self {
        self.required_resources = reqs;
        self
    }

    pub fn with_estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration = Some(duration);
        self
    }
}
