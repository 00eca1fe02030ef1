//! Node Registry: authoritative in-memory node-id → node-record mapping
//! (spec §2). Shared between the scheduler (reads candidates, mutates
//! load on assign/release) and the health monitor (mutates status and
//! failure counters) via a single mutex, matching the "each shared
//! structure guarded by one reentrant mutex" rule in spec §5.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use taskfabric_core::{can_handle, CoreError, CoreResult, FailureKind, Node, NodeId, NodeStatus, Task, TaskId};

#[derive(Clone, Default)]
pub struct NodeRegistry {
    inner: Arc<Mutex<HashMap<NodeId, Node>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn register(&self, node: Node) {
        let mut nodes = self.inner.lock().expect("node registry poisoned");
        nodes.insert(node.id.clone(), node);
    }

    pub fn unregister(&self, id: &NodeId) -> Option<Node> {
        let mut nodes = self.inner.lock().expect("node registry poisoned");
        nodes.remove(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<Node> {
        let nodes = self.inner.lock().expect("node registry poisoned");
        nodes.get(id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Node> {
        let nodes = self.inner.lock().expect("node registry poisoned");
        nodes.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("node registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Candidate set for a task: `AVAILABLE` nodes with spare load that
    /// satisfy every required capability (spec §4.1 step 3).
    pub fn candidates(&self, task: &Task) -> Vec<Node> {
        let nodes = self.inner.lock().expect("node registry poisoned");
        nodes.values().filter(|n| can_handle(n, task)).cloned().collect()
    }

    pub fn assign(&self, node_id: &NodeId, task_id: TaskId) -> CoreResult<()> {
        let mut nodes = self.inner.lock().expect("node registry poisoned");
        let node = nodes.get_mut(node_id).ok_or_else(|| CoreError::NotFound(node_id.clone()))?;
        node.assign(task_id);
        Ok(())
    }

    pub fn release(&self, node_id: &NodeId, task_id: &TaskId) {
        let mut nodes = self.inner.lock().expect("node registry poisoned");
        if let Some(node) = nodes.get_mut(node_id) {
            node.release(task_id);
        }
    }

    pub fn set_status(&self, node_id: &NodeId, status: NodeStatus) {
        let mut nodes = self.inner.lock().expect("node registry poisoned");
        if let Some(node) = nodes.get_mut(node_id) {
            node.status = status;
        }
    }

    pub fn record_heartbeat(&self, node_id: &NodeId, received_at: Instant) {
        let mut nodes = self.inner.lock().expect("node registry poisoned");
        if let Some(node) = nodes.get_mut(node_id) {
            node.record_heartbeat(received_at);
        }
    }

    pub fn record_failure(&self, node_id: &NodeId, kind: FailureKind, at: Instant) -> Option<u32> {
        let mut nodes = self.inner.lock().expect("node registry poisoned");
        let node = nodes.get_mut(node_id)?;
        node.record_failure(kind, at);
        Some(node.consecutive_failures)
    }

    pub fn reset_failures(&self, node_id: &NodeId) {
        let mut nodes = self.inner.lock().expect("node registry poisoned");
        if let Some(node) = nodes.get_mut(node_id) {
            node.reset_failures();
        }
    }

    pub fn bump_recovery_attempts(&self, node_id: &NodeId) {
        let mut nodes = self.inner.lock().expect("node registry poisoned");
        if let Some(node) = nodes.get_mut(node_id) {
            node.recovery_attempts += 1;
        }
    }

    pub fn ids(&self) -> Vec<NodeId> {
        let nodes = self.inner.lock().expect("node registry poisoned");
        nodes.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Node {
        Node::new(id.into(), id.into(), "127.0.0.1".into(), 9000)
    }

    #[test]
    fn register_then_get_roundtrips() {
        let registry = NodeRegistry::new();
        registry.register(node("n1"));
        assert!(registry.get(&"n1".to_string()).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_removes_node() {
        let registry = NodeRegistry::new();
        registry.register(node("n1"));
        let removed = registry.unregister(&"n1".to_string());
        assert!(removed.is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn assign_and_release_round_trip_load() {
        let registry = NodeRegistry::new();
        registry.register(node("n1"));
        let task_id = TaskId::new_v4();
        registry.assign(&"n1".to_string(), task_id).unwrap();
        let n = registry.get(&"n1".to_string()).unwrap();
        assert!(n.current_load() > 0.0);
        registry.release(&"n1".to_string(), &task_id);
        let n = registry.get(&"n1".to_string()).unwrap();
        assert_eq!(n.current_load(), 0.0);
    }
}
