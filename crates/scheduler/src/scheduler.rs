//! The Scheduler: Task Registry + Priority Queue + scheduling loop +
//! dispatch pool (spec §4.1). Grounded on `layer4::scheduler`'s
//! `SchedulerConfig`/shutdown-drain shape, generalized from Layer 4
//! agents to the placement-policy candidate model in spec §4.4.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

use taskfabric_core::{FailureKind, Node, NodeId, Task, TaskId, TaskStatus};
use taskfabric_fault_tolerance::NodeRegistry;

use crate::error::{SchedulerError, SchedulerResult};
use crate::placement;
use crate::placement::PlacementStrategy;
use crate::queue::PriorityQueue;
use crate::retry::RetryCoordinator;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub strategy: PlacementStrategy,
    pub max_workers: usize,
    pub task_timeout: Duration,
    pub task_timeout_check_interval: Duration,
    pub retry_base_delay_secs: f64,
    pub max_retries: u32,
    /// Poll interval when the queue is empty (spec §4.1 step 1, ≤1s).
    pub idle_sleep: Duration,
    /// Re-queue sleep when the candidate set is empty (step 4).
    pub empty_candidates_sleep: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: PlacementStrategy::default(),
            max_workers: 16,
            task_timeout: Duration::from_secs(300),
            task_timeout_check_interval: Duration::from_secs(10),
            retry_base_delay_secs: 2.0,
            max_retries: 3,
            idle_sleep: Duration::from_secs(1),
            empty_candidates_sleep: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    retried: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub pending: usize,
    pub running: usize,
    pub registered_nodes: usize,
    pub strategy: PlacementStrategy,
    pub permanent_failures: u64,
}

/// Invoked with `(task_id, last_node_id, retry_count)` to resubmit a
/// failed task (spec §6 "retry callback").
pub type RetryCallback = dyn Fn(TaskId, Option<NodeId>, u32) + Send + Sync;

pub struct Scheduler {
    config: SchedulerConfig,
    nodes: NodeRegistry,
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
    queue: Arc<Mutex<PriorityQueue>>,
    retry: Arc<Mutex<RetryCoordinator>>,
    retry_callback: RwLock<Option<Arc<RetryCallback>>>,
    semaphore: Arc<Semaphore>,
    stats: SchedulerStats,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, nodes: NodeRegistry) -> Arc<Self> {
        let retry = RetryCoordinator::new(config.retry_base_delay_secs, config.max_retries);
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_workers)),
            queue: Arc::new(Mutex::new(PriorityQueue::new())),
            retry: Arc::new(Mutex::new(retry)),
            retry_callback: RwLock::new(None),
            tasks: Arc::new(RwLock::new(HashMap::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: SchedulerStats::default(),
            config,
            nodes,
        })
    }

    pub async fn set_retry_callback(&self, callback: Arc<RetryCallback>) {
        *self.retry_callback.write().await = Some(callback);
    }

    /// Precondition: `task.callable` is always set at construction time
    /// (`Task::new` requires it). Never blocks.
    pub async fn submit(&self, task: Task) -> TaskId {
        let task_id = task.id;
        let priority = task.priority;
        let submit_time = task.submit_time;
        self.tasks.write().await.insert(task_id, task);
        self.queue.lock().expect("poisoned").push(task_id, priority, submit_time);
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        task_id
    }

    pub async fn cancel(&self, task_id: &TaskId) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else { return false };
        match task.status {
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => false,
            TaskStatus::Pending => {
                task.status = TaskStatus::Cancelled;
                drop(tasks);
                self.queue.lock().expect("poisoned").remove(task_id);
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                true
            }
            TaskStatus::Running => {
                let node_id = task.assigned_node_id.take();
                task.status = TaskStatus::Cancelled;
                drop(tasks);
                if let Some(node_id) = node_id {
                    self.nodes.release(&node_id, task_id);
                }
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    pub async fn get_result(&self, task_id: &TaskId, timeout: Duration) -> SchedulerResult<serde_json::Value> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let tasks = self.tasks.read().await;
                let task = tasks.get(task_id).ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?;
                match task.status {
                    TaskStatus::Completed => return Ok(task.result.clone().unwrap_or(serde_json::Value::Null)),
                    TaskStatus::Failed => {
                        return Err(SchedulerError::TaskExecutionError(task.error.clone().unwrap_or_default()))
                    }
                    TaskStatus::Cancelled => {
                        return Err(SchedulerError::TaskExecutionError("task was cancelled".into()))
                    }
                    TaskStatus::Pending | TaskStatus::Running => {}
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SchedulerError::Timeout(task_id.to_string()));
            }
            tokio::time::sleep(remaining.min(Duration::from_millis(100))).await;
        }
    }

    pub fn register_node(&self, node: Node) {
        self.nodes.register(node);
    }

    /// On unregister: running tasks go back to PENDING with the node-id
    /// cleared, keeping their ORIGINAL submit-time (spec §5: "re-queued
    /// orphaned tasks keep their original submit-time to avoid
    /// starvation" — this overrides the looser "fresh submit-time"
    /// phrasing in §4.1, which names the same tiebreaker).
    pub async fn unregister_node(&self, node_id: &NodeId) -> SchedulerResult<()> {
        let removed = self.nodes.unregister(node_id).ok_or_else(|| SchedulerError::NotFound(node_id.clone()))?;
        self.requeue_orphans(&removed.task_set).await;
        Ok(())
    }

    /// Called when the health monitor marks a node FAILED (not removed
    /// from the registry, just ineligible for new placement): its
    /// running tasks are orphaned the same way as an explicit unregister.
    pub async fn requeue_tasks_on_failed_node(&self, node_id: &NodeId) {
        let Some(node) = self.nodes.get(node_id) else { return };
        self.requeue_orphans(&node.task_set).await;
    }

    /// Resubmits a previously-FAILED task for another attempt (spec §4.2
    /// "retry callback" / §8 scenario 4): clears the failure, resets to
    /// PENDING with a fresh submit-time, and re-enters the queue. A
    /// no-op if the task no longer exists or isn't FAILED (e.g. it was
    /// cancelled while the retry was pending).
    pub async fn requeue_for_retry(&self, task_id: &TaskId) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else { return false };
        if task.status != TaskStatus::Failed {
            return false;
        }
        task.status = TaskStatus::Pending;
        task.error = None;
        task.assigned_node_id = None;
        task.submit_time = Instant::now();
        let (priority, submit_time) = (task.priority, task.submit_time);
        drop(tasks);
        self.queue.lock().expect("poisoned").push(*task_id, priority, submit_time);
        true
    }

    async fn requeue_orphans(&self, task_ids: &std::collections::HashSet<TaskId>) {
        let mut tasks = self.tasks.write().await;
        for task_id in task_ids {
            if let Some(task) = tasks.get_mut(task_id) {
                if task.status == TaskStatus::Running {
                    task.status = TaskStatus::Pending;
                    task.assigned_node_id = None;
                    self.queue.lock().expect("poisoned").push(*task_id, task.priority, task.submit_time);
                }
            }
        }
    }

    pub async fn system_status(&self) -> SystemStatus {
        let tasks = self.tasks.read().await;
        let mut pending = 0usize;
        let mut running = 0usize;
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => pending += 1,
                TaskStatus::Running => running += 1,
                _ => {}
            }
        }
        SystemStatus {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
            pending,
            running,
            registered_nodes: self.nodes.len(),
            strategy: self.config.strategy,
            permanent_failures: self.retry.lock().expect("poisoned").permanent_failures(),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_loop().await })
    }

    pub fn spawn_timeout_checker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.timeout_checker_loop().await })
    }

    pub fn spawn_retry_worker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.retry_worker_loop().await })
    }

    async fn run_loop(self: Arc<Self>) {
        info!("scheduler loop starting");
        while !self.shutdown.load(Ordering::Relaxed) {
            let popped = self.queue.lock().expect("poisoned").pop();
            let Some(task_id) = popped else {
                tokio::time::sleep(self.config.idle_sleep).await;
                continue;
            };

            let task_snapshot = { self.tasks.read().await.get(&task_id).cloned() };
            let Some(task) = task_snapshot else { continue };
            if task.status != TaskStatus::Pending {
                continue;
            }

            let candidates = self.nodes.candidates(&task);
            if candidates.is_empty() {
                let mut tasks = self.tasks.write().await;
                if let Some(t) = tasks.get_mut(&task_id) {
                    t.submit_time = Instant::now();
                    let (priority, submit_time) = (t.priority, t.submit_time);
                    drop(tasks);
                    self.queue.lock().expect("poisoned").push(task_id, priority, submit_time);
                }
                tokio::time::sleep(self.config.empty_candidates_sleep).await;
                continue;
            }

            let chosen = placement::select_node(self.config.strategy, &candidates, &task).clone();
            if self.nodes.assign(&chosen.id, task_id).is_err() {
                continue;
            }
            {
                let mut tasks = self.tasks.write().await;
                if let Some(t) = tasks.get_mut(&task_id) {
                    t.status = TaskStatus::Running;
                    t.start_time = Some(Instant::now());
                    t.assigned_node_id = Some(chosen.id.clone());
                }
            }
            self.dispatch(task_id, chosen.id.clone());
        }
        info!("scheduler loop stopped");
    }

    fn dispatch(self: &Arc<Self>, task_id: TaskId, node_id: NodeId) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let permit = this.semaphore.clone().acquire_owned().await;
            let Ok(_permit) = permit else { return };

            let snapshot = { this.tasks.read().await.get(&task_id).cloned() };
            let Some(task) = snapshot else { return };
            if task.status != TaskStatus::Running {
                this.nodes.release(&node_id, &task_id);
                return;
            }

            let result = task.callable.call(&task.args).await;
            this.complete(task_id, node_id, result).await;
        });
    }

    async fn complete(self: &Arc<Self>, task_id: TaskId, node_id: NodeId, result: Result<serde_json::Value, String>) {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&task_id) else { return };

        // cancellation is cooperative: the in-flight execution was never
        // forcibly killed; its eventual result is discarded (spec §4.1).
        if task.status == TaskStatus::Cancelled {
            drop(tasks);
            self.nodes.release(&node_id, &task_id);
            return;
        }

        match result {
            Ok(value) => {
                task.status = TaskStatus::Completed;
                task.result = Some(value);
                task.complete_time = Some(Instant::now());
                drop(tasks);
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                self.nodes.release(&node_id, &task_id);
            }
            Err(err) => {
                task.status = TaskStatus::Failed;
                task.error = Some(err);
                task.complete_time = Some(Instant::now());
                drop(tasks);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.nodes.release(&node_id, &task_id);
                self.retry.lock().expect("poisoned").record_failure(task_id, Some(node_id), FailureKind::Unknown, Instant::now());
            }
        }
    }

    async fn timeout_checker_loop(self: Arc<Self>) {
        info!("task timeout checker starting");
        while !self.shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            let expired: Vec<TaskId> = {
                let tasks = self.tasks.read().await;
                tasks
                    .values()
                    .filter(|t| {
                        t.status == TaskStatus::Running
                            && t.start_time.is_some_and(|start| now.saturating_duration_since(start) > self.config.task_timeout)
                    })
                    .map(|t| t.id)
                    .collect()
            };
            for task_id in expired {
                debug!(task_id = %task_id, "task exceeded task_timeout, cancelling");
                self.cancel(&task_id).await;
            }
            tokio::time::sleep(self.config.task_timeout_check_interval).await;
        }
        info!("task timeout checker stopped");
    }

    async fn retry_worker_loop(self: Arc<Self>) {
        info!("retry worker starting");
        while !self.shutdown.load(Ordering::Relaxed) {
            let callback = self.retry_callback.read().await.clone();
            let now = Instant::now();
            let mut fired = Vec::new();
            self.retry.lock().expect("poisoned").tick(now, |task_id, node_id, retry_count| {
                fired.push((task_id, node_id, retry_count));
            });
            for (task_id, node_id, retry_count) in fired {
                self.stats.retried.fetch_add(1, Ordering::Relaxed);
                if let Some(callback) = &callback {
                    callback(task_id, node_id, retry_count);
                } else {
                    warn!(task_id = %task_id, "no retry callback registered, leaving task as-is");
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        info!("retry worker stopped");
    }
}
