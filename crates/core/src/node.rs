//! Node record and status state machine.
//!
//! A `Node` is the authoritative in-memory representation of a worker in
//! the cluster. It is owned by the fault-tolerance crate's `NodeRegistry`
//! and read (never mutated) by the scheduler when building a candidate
//! set for placement.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Opaque, caller-assigned node identifier.
pub type NodeId = String;

/// Lifecycle status of a node.
///
/// Transitions are driven by the heartbeat/health monitor (see
/// `taskfabric-fault-tolerance`); the scheduler only ever reads this
/// field, it never writes it directly except via `Scheduler::register_node`
/// / `unregister_node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Available,
    Busy,
    Offline,
    Maintenance,
    Failed,
    Recovering,
    Inactive,
}

/// Classification of a node failure, used to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    NodeUnreachable,
    TaskTimeout,
    MemoryError,
    NetworkError,
    SystemError,
    Unknown,
}

impl FailureKind {
    /// Maps an unrecognized wire string to `Unknown` rather than failing
    /// deserialization, per spec.md's "unknown values from wire messages
    /// default to a reserved UNKNOWN variant" rule.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "node_unreachable" => FailureKind::NodeUnreachable,
            "task_timeout" => FailureKind::TaskTimeout,
            "memory_error" => FailureKind::MemoryError,
            "network_error" => FailureKind::NetworkError,
            "system_error" => FailureKind::SystemError,
            other => {
                tracing::warn!(value = other, "unrecognized failure kind on wire, defaulting to Unknown");
                FailureKind::Unknown
            }
        }
    }
}

/// A capability value a node advertises. Numeric capabilities are
/// compared against a task's numeric requirement; set-valued capabilities
/// are checked for membership against a task's required string value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CapabilityValue {
    Scalar(f64),
    Set(HashSet<String>),
}

/// In-memory record for one cluster worker.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub display_name: String,
    pub address: String,
    pub port: u16,
    pub status: NodeStatus,
    /// Fraction of capacity in use, always clamped to `[0.0, 1.0]`.
    current_load: f64,
    pub task_set: HashSet<TaskId>,
    pub capabilities: HashMap<String, CapabilityValue>,
    /// Latest sampled numeric resource vector (cpu, memory, ... as
    /// fractions or absolute units depending on the metric).
    pub resources: HashMap<String, f64>,
    pub last_heartbeat: Instant,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_failure_time: Option<Instant>,
    pub last_failure_kind: Option<FailureKind>,
    pub recovery_attempts: u32,
}

/// Per-assignment load delta. The spec states "each assignment adds
/// roughly 0.1, each completion subtracts roughly 0.1, clamped" — this
/// is a deliberately coarse proxy for occupancy, not a real utilization
/// measurement.
const LOAD_STEP: f64 = 0.1;

/// Load at or above this threshold marks a node `Busy` on assignment.
const BUSY_LOAD_THRESHOLD: f64 = 0.8;

/// Load at or above this threshold makes a node ineligible for new work,
/// even if its status is still `Available`.
pub const MAX_ASSIGNABLE_LOAD: f64 = 0.9;

impl Node {
    pub fn new(id: NodeId, display_name: String, address: String, port: u16) -> Self {
        Self {
            id,
            display_name,
            address,
            port,
            status: NodeStatus::Available,
            current_load: 0.0,
            task_set: HashSet::new(),
            capabilities: HashMap::new(),
            resources: HashMap::new(),
            last_heartbeat: Instant::now(),
            consecutive_failures: 0,
            total_failures: 0,
            last_failure_time: None,
            last_failure_kind: None,
            recovery_attempts: 0,
        }
    }

    pub fn current_load(&self) -> f64 {
        self.current_load
    }

    /// True iff the node is `Available` and has spare assignable load.
    /// `can_handle` (capability matching) is a separate, orthogonal check.
    pub fn is_placement_candidate(&self) -> bool {
        self.status == NodeStatus::Available && self.current_load < MAX_ASSIGNABLE_LOAD
    }

    /// Records a new assignment: bumps load, inserts the task id, and
    /// flips to `Busy` once the busy threshold is crossed.
    pub fn assign(&mut self, task_id: TaskId) {
        self.task_set.insert(task_id);
        self.current_load = (self.current_load + LOAD_STEP).min(1.0);
        if self.current_load >= BUSY_LOAD_THRESHOLD {
            self.status = NodeStatus::Busy;
        }
    }

    /// Records a completion or cancellation: drops the task id and
    /// lowers load. Does not change status back to `Available` on its
    /// own — a node that was manually set to `Maintenance`/`Offline`
    /// should stay there until explicitly changed.
    pub fn release(&mut self, task_id: &TaskId) {
        self.task_set.remove(task_id);
        self.current_load = (self.current_load - LOAD_STEP).max(0.0);
        if self.status == NodeStatus::Busy && self.current_load < BUSY_LOAD_THRESHOLD {
            self.status = NodeStatus::Available;
        }
    }

    pub fn record_heartbeat(&mut self, received_at: Instant) {
        self.last_heartbeat = received_at;
    }

    pub fn record_failure(&mut self, kind: FailureKind, at: Instant) {
        self.consecutive_failures += 1;
        self.total_failures += 1;
        self.last_failure_time = Some(at);
        self.last_failure_kind = Some(kind);
    }

    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
        self.recovery_attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new("n1".into(), "n1".into(), "127.0.0.1".into(), 9000)
    }

    #[test]
    fn assign_increments_load_and_clamps() {
        let mut n = node();
        for _ in 0..12 {
            n.assign(uuid::Uuid::new_v4());
        }
        assert!((n.current_load() - 1.0).abs() < f64::EPSILON);
        assert_eq!(n.status, NodeStatus::Busy);
    }

    #[test]
    fn release_decrements_load_and_clamps_to_zero() {
        let mut n = node();
        let t = uuid::Uuid::new_v4();
        n.assign(t);
        n.release(&t);
        assert!((n.current_load() - 0.0).abs() < f64::EPSILON);
        n.release(&uuid::Uuid::new_v4());
        assert!(n.current_load() >= 0.0);
    }

    #[test]
    fn busy_reverts_to_available_below_threshold() {
        let mut n = node();
        let ids: Vec<_> = (0..8).map(|_| uuid::Uuid::new_v4()).collect();
        for id in &ids {
            n.assign(*id);
        }
        assert_eq!(n.status, NodeStatus::Busy);
        n.release(&ids[0]);
        assert_eq!(n.status, NodeStatus::Available);
    }
}
