//! Placement strategies over a prefiltered candidate set (spec §4.4).
//!
//! All strategies tie-break on the smallest node id, for determinism.

use serde::{Deserialize, Serialize};
use taskfabric_core::{CapabilityValue, Node, RequiredResource, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    RoundRobin,
    LeastLoaded,
    PriorityBased,
    ResourceAware,
    Adaptive,
}

impl Default for PlacementStrategy {
    fn default() -> Self {
        PlacementStrategy::LeastLoaded
    }
}

/// Selects one node from `candidates` for `task`. Callers must never pass
/// an empty slice — per spec §9, placement never runs on an empty
/// candidate set; the scheduling loop's step 4 short-circuits first.
pub fn select_node<'a>(strategy: PlacementStrategy, candidates: &'a [Node], task: &Task) -> &'a Node {
    debug_assert!(!candidates.is_empty(), "select_node called with an empty candidate set");
    match strategy {
        PlacementStrategy::RoundRobin => pick_min_by_key(candidates, |_| 0.0),
        PlacementStrategy::LeastLoaded => pick_min_by_key(candidates, Node::current_load),
        PlacementStrategy::PriorityBased => pick_max_lexicographic(candidates, priority_based_keys),
        PlacementStrategy::ResourceAware => pick_max_by_key(candidates, |n| resource_score(n, task)),
        PlacementStrategy::Adaptive => adaptive(candidates, task),
    }
}

fn pick_min_by_key<F: Fn(&Node) -> f64>(candidates: &[Node], key: F) -> &Node {
    let mut best = &candidates[0];
    let mut best_key = key(best);
    for node in &candidates[1..] {
        let k = key(node);
        if k < best_key || (k == best_key && node.id < best.id) {
            best = node;
            best_key = k;
        }
    }
    best
}

fn pick_max_by_key<F: Fn(&Node) -> f64>(candidates: &[Node], key: F) -> &Node {
    let mut best = &candidates[0];
    let mut best_key = key(best);
    for node in &candidates[1..] {
        let k = key(node);
        if k > best_key || (k == best_key && node.id < best.id) {
            best = node;
            best_key = k;
        }
    }
    best
}

/// Picks the candidate whose key tuple is lexicographically greatest:
/// the first component decides unless it's an exact tie, in which case
/// the second component breaks it, then smallest node id.
fn pick_max_lexicographic<F: Fn(&Node) -> (f64, f64)>(candidates: &[Node], key: F) -> &Node {
    let mut best = &candidates[0];
    let mut best_key = key(best);
    for node in &candidates[1..] {
        let k = key(node);
        let better = k.0 > best_key.0
            || (k.0 == best_key.0 && k.1 > best_key.1)
            || (k.0 == best_key.0 && k.1 == best_key.1 && node.id < best.id);
        if better {
            best = node;
            best_key = k;
        }
    }
    best
}

fn priority_capability(node: &Node) -> f64 {
    match node.capabilities.get("priority") {
        Some(CapabilityValue::Scalar(v)) => *v,
        _ => 0.0,
    }
}

/// Lexicographic (1 − load, capability["priority"]): load strictly
/// dominates, priority only breaks an exact load tie.
fn priority_based_keys(node: &Node) -> (f64, f64) {
    (1.0 - node.current_load(), priority_capability(node))
}

fn resource_score(node: &Node, task: &Task) -> f64 {
    let mut score = 1.0 - node.current_load();
    for (cap, requirement) in &task.required_resources {
        match requirement {
            RequiredResource::Numeric(required) => {
                if let Some(available) = node.resources.get(cap) {
                    if *available > 0.0 {
                        score += (available - required) / available;
                    }
                }
            }
            RequiredResource::StringValue(value) => {
                if let Some(CapabilityValue::Set(values)) = node.capabilities.get(cap) {
                    if values.contains(value) {
                        score += 0.1;
                    }
                }
            }
        }
    }
    score
}

fn adaptive<'a>(candidates: &'a [Node], task: &Task) -> &'a Node {
    let mean_load = candidates.iter().map(Node::current_load).sum::<f64>() / candidates.len() as f64;
    if mean_load > 0.7 {
        pick_min_by_key(candidates, Node::current_load)
    } else if task.priority > 5 {
        pick_max_lexicographic(candidates, priority_based_keys)
    } else {
        pick_max_by_key(candidates, |n| resource_score(n, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use taskfabric_core::{TaskArgs, TaskCallable};

    struct NoopCallable;
    #[async_trait::async_trait]
    impl TaskCallable for NoopCallable {
        async fn call(&self, _args: &TaskArgs) -> Result<serde_json::Value, String> {
            Ok(serde_json::Value::Null)
        }
    }

    fn task(priority: i64) -> Task {
        Task::new("t", Arc::new(NoopCallable), TaskArgs::default(), priority)
    }

    fn node(id: &str, load_steps: u32) -> Node {
        let mut n = Node::new(id.into(), id.into(), "h".into(), 1);
        for _ in 0..load_steps {
            n.assign(taskfabric_core::TaskId::new_v4());
        }
        n
    }

    #[test]
    fn round_robin_picks_smallest_id() {
        let nodes = vec![node("b", 0), node("a", 0)];
        let picked = select_node(PlacementStrategy::RoundRobin, &nodes, &task(0));
        assert_eq!(picked.id, "a");
    }

    #[test]
    fn least_loaded_picks_lowest_load() {
        let nodes = vec![node("a", 5), node("b", 1)];
        let picked = select_node(PlacementStrategy::LeastLoaded, &nodes, &task(0));
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn resource_aware_prefers_more_spare_capacity() {
        let mut a = node("a", 0);
        a.resources.insert("cpu".into(), 2.0);
        let mut b = node("b", 0);
        b.resources.insert("cpu".into(), 8.0);
        let mut reqs = HashMap::new();
        reqs.insert("cpu".into(), RequiredResource::Numeric(1.0));
        let t = task(0).with_required_resources(reqs);
        let nodes = [a, b];
        let picked = select_node(PlacementStrategy::ResourceAware, &nodes, &t);
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn adaptive_falls_back_to_least_loaded_under_high_mean_load() {
        let nodes = vec![node("a", 8), node("b", 9)];
        let picked = select_node(PlacementStrategy::Adaptive, &nodes, &task(0));
        assert_eq!(picked.id, "a");
    }

    #[test]
    fn priority_based_never_lets_priority_override_a_load_difference() {
        let mut loaded = node("a", 9);
        loaded.capabilities.insert("priority".into(), CapabilityValue::Scalar(1_000_000.0));
        let idle = node("b", 0);
        let nodes = [loaded, idle];
        let picked = select_node(PlacementStrategy::PriorityBased, &nodes, &task(0));
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn priority_based_breaks_exact_load_ties_by_priority() {
        let mut low_priority = node("a", 2);
        low_priority.capabilities.insert("priority".into(), CapabilityValue::Scalar(1.0));
        let mut high_priority = node("b", 2);
        high_priority.capabilities.insert("priority".into(), CapabilityValue::Scalar(5.0));
        let nodes = [low_priority, high_priority];
        let picked = select_node(PlacementStrategy::PriorityBased, &nodes, &task(0));
        assert_eq!(picked.id, "b");
    }
}
