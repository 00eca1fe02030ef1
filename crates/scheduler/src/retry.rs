//! Retry Coordinator: tracks task failures and reschedules with jittered
//! exponential backoff until `max_retries` (spec §3 Task-Failure Record,
//! §4.2 "Task-failure retry").
//!
//! Delay formula follows the worked example in spec §4.2/§8 scenario 4
//! literally (base=2 ⇒ retries at ~2s, ~4s): `next_retry_time = now +
//! base·n + U[0, 0.1·base·n]` where `n` is the attempt about to run.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use taskfabric_core::{FailureKind, NodeId, TaskId};

#[derive(Debug, Clone)]
pub struct TaskFailureRecord {
    pub task_id: TaskId,
    pub last_node_id: Option<NodeId>,
    pub failure_kind: FailureKind,
    pub failure_time: Instant,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_time: Instant,
}

pub struct RetryCoordinator {
    base: f64,
    max_retries: u32,
    records: HashMap<TaskId, TaskFailureRecord>,
    permanent_failures: u64,
}

impl RetryCoordinator {
    pub fn new(base: f64, max_retries: u32) -> Self {
        Self { base, max_retries, records: HashMap::new(), permanent_failures: 0 }
    }

    pub fn permanent_failures(&self) -> u64 {
        self.permanent_failures
    }

    pub fn pending(&self) -> usize {
        self.records.len()
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let n = attempt.max(1) as f64;
        let base_component = self.base * n;
        let jitter_bound = 0.1 * self.base * n;
        let jitter = if jitter_bound > 0.0 { rand::thread_rng().gen_range(0.0..jitter_bound) } else { 0.0 };
        Duration::from_secs_f64(base_component + jitter)
    }

    /// Records a failure for a task. If a record already exists (the
    /// task was re-dispatched after a previous failure and failed
    /// again), its `retry_count` carries forward instead of resetting —
    /// otherwise a task that keeps failing would never reach
    /// `max_retries`.
    pub fn record_failure(&mut self, task_id: TaskId, last_node_id: Option<NodeId>, kind: FailureKind, now: Instant) {
        let retry_count = self.records.get(&task_id).map(|r| r.retry_count).unwrap_or(0);
        let next_retry_time = now + self.jittered_delay(retry_count + 1);
        self.records.insert(
            task_id,
            TaskFailureRecord {
                task_id,
                last_node_id,
                failure_kind: kind,
                failure_time: now,
                retry_count,
                max_retries: self.max_retries,
                next_retry_time,
            },
        );
    }

    pub fn cancel(&mut self, task_id: &TaskId) {
        self.records.remove(task_id);
    }

    /// Runs one tick: invokes `callback` for every record whose
    /// `next_retry_time` has passed, advances `retry_count`, and purges
    /// records that have exhausted `max_retries`.
    pub fn tick<F>(&mut self, now: Instant, mut callback: F)
    where
        F: FnMut(TaskId, Option<NodeId>, u32),
    {
        let eligible: Vec<TaskId> = self
            .records
            .iter()
            .filter(|(_, r)| now >= r.next_retry_time && r.retry_count < r.max_retries)
            .map(|(id, _)| *id)
            .collect();

        for task_id in eligible {
            let Some(record) = self.records.get_mut(&task_id) else { continue };
            callback(record.task_id, record.last_node_id.clone(), record.retry_count);
            record.retry_count += 1;
            if record.retry_count >= record.max_retries {
                self.records.remove(&task_id);
                self.permanent_failures += 1;
            } else {
                let next_count = record.retry_count + 1;
                let delay = self.jittered_delay(next_count);
                let record = self.records.get_mut(&task_id).expect("record exists");
                record.next_retry_time = now + delay;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligible_record_fires_and_reschedules() {
        let mut coordinator = RetryCoordinator::new(2.0, 3);
        let task_id = TaskId::new_v4();
        let t0 = Instant::now();
        coordinator.record_failure(task_id, None, FailureKind::Unknown, t0);

        let mut fired = Vec::new();
        coordinator.tick(t0, |id, _, count| fired.push((id, count)));
        assert!(fired.is_empty(), "should not fire before next_retry_time");

        let later = t0 + Duration::from_secs(3);
        coordinator.tick(later, |id, _, count| fired.push((id, count)));
        assert_eq!(fired, vec![(task_id, 0)]);
        assert_eq!(coordinator.pending(), 1);
    }

    #[test]
    fn record_purged_after_max_retries() {
        let mut coordinator = RetryCoordinator::new(0.0, 1);
        let task_id = TaskId::new_v4();
        let t0 = Instant::now();
        coordinator.record_failure(task_id, None, FailureKind::Unknown, t0);
        coordinator.tick(t0, |_, _, _| {});
        assert_eq!(coordinator.pending(), 0);
        assert_eq!(coordinator.permanent_failures(), 1);
    }

    #[test]
    fn repeated_failures_of_the_same_task_advance_toward_max_retries() {
        // a task that keeps failing on every dispatch must still be
        // purged after max_retries attempts, not oscillate forever.
        let mut coordinator = RetryCoordinator::new(0.0, 2);
        let task_id = TaskId::new_v4();
        let t0 = Instant::now();

        coordinator.record_failure(task_id, None, FailureKind::Unknown, t0);
        coordinator.tick(t0, |_, _, _| {});
        assert_eq!(coordinator.pending(), 1);

        // the task was re-dispatched and failed again before its next
        // scheduled retry fired; record_failure must not reset the count.
        coordinator.record_failure(task_id, None, FailureKind::Unknown, t0);
        coordinator.tick(t0, |_, _, _| {});
        assert_eq!(coordinator.pending(), 0);
        assert_eq!(coordinator.permanent_failures(), 1);
    }
}
