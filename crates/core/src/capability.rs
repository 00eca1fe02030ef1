//! Capability matching between a task's requirements and a node's
//! advertised capabilities / sampled resources (spec.md §4.1, `can_handle`).

use crate::node::{CapabilityValue, Node};
use crate::task::{RequiredResource, Task};

/// True iff `node` satisfies every entry in `task.required_resources` and
/// has spare assignable load. This is the single source of truth for
/// candidate-set membership; the scheduler must not duplicate this logic.
pub fn can_handle(node: &Node, task: &Task) -> bool {
    if !node.is_placement_candidate() {
        return false;
    }

    task.required_resources.iter().all(|(cap, requirement)| match requirement {
        RequiredResource::Numeric(required) => node
            .resources
            .get(cap)
            .map(|available| *available >= *required)
            .unwrap_or(false),
        RequiredResource::StringValue(value) => match node.capabilities.get(cap) {
            Some(CapabilityValue::Set(values)) => values.contains(value),
            _ => false,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeStatus;
    use crate::task::TaskArgs;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    struct NoopCallable;
    #[async_trait::async_trait]
    impl crate::task::TaskCallable for NoopCallable {
        async fn call(&self, _args: &TaskArgs) -> Result<serde_json::Value, String> {
            Ok(serde_json::Value::Null)
        }
    }

    fn make_task(reqs: HashMap<String, RequiredResource>) -> Task {
        Task::new("t", Arc::new(NoopCallable), TaskArgs::default(), 0).with_required_resources(reqs)
    }

    #[test]
    fn numeric_requirement_checks_available_resource() {
        let mut node = Node::new("n1".into(), "n1".into(), "h".into(), 1);
        node.resources.insert("cpu".into(), 4.0);
        let mut reqs = HashMap::new();
        reqs.insert("cpu".into(), RequiredResource::Numeric(2.0));
        assert!(can_handle(&node, &make_task(reqs.clone())));

        reqs.insert("cpu".into(), RequiredResource::Numeric(8.0));
        assert!(!can_handle(&node, &make_task(reqs)));
    }

    #[test]
    fn missing_capability_fails_closed() {
        let node = Node::new("n1".into(), "n1".into(), "h".into(), 1);
        let mut reqs = HashMap::new();
        reqs.insert("gpu".into(), RequiredResource::StringValue("a100".into()));
        assert!(!can_handle(&node, &make_task(reqs)));
    }

    #[test]
    fn string_requirement_checks_set_membership() {
        let mut node = Node::new("n1".into(), "n1".into(), "h".into(), 1);
        let mut set = HashSet::new();
        set.insert("a100".to_string());
        node.capabilities.insert("gpu".into(), CapabilityValue::Set(set));
        let mut reqs = HashMap::new();
        reqs.insert("gpu".into(), RequiredResource::StringValue("a100".into()));
        assert!(can_handle(&node, &make_task(reqs.clone())));

        reqs.insert("gpu".into(), RequiredResource::StringValue("v100".into()));
        assert!(!can_handle(&node, &make_task(reqs)));
    }

    #[test]
    fn non_available_or_overloaded_node_is_never_a_candidate() {
        let mut node = Node::new("n1".into(), "n1".into(), "h".into(), 1);
        node.status = NodeStatus::Offline;
        assert!(!can_handle(&node, &make_task(HashMap::new())));
    }
}
