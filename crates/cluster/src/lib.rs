//! Cluster composition root: owns one instance of every subsystem (the
//! scheduler, node registry, heartbeat monitor, recovery dispatcher,
//! resource monitor and, optionally, the database failover manager)
//! plus the background tasks that drive them, and wires the
//! cross-cutting callback the subsystems can't see each other for
//! directly — a FAILED node's orphaned tasks going back to the
//! scheduler's queue.
//!
//! Grounded on `layer4::Layer4Fabric`: a single struct owning every
//! subsystem and config, an async `new()` constructor, `start()`/
//! `shutdown()` lifecycle methods, and delegating methods for the
//! public surface.

pub mod config;
pub mod error;
pub mod transport;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use taskfabric_core::{Node, NodeId, Task, TaskId};
use taskfabric_db_pool::{BackendFactory, DatabaseEndpoint, FailoverManager, FailoverPhase};
use taskfabric_fault_tolerance::{HeartbeatMonitor, NodeRegistry, NodeTransport, RecoveryDispatcher};
use taskfabric_resource_monitor::ResourceMonitor;
use taskfabric_scheduler::{Scheduler, SystemStatus};

pub use config::ClusterConfig;
pub use error::{ClusterError, ClusterResult};
pub use transport::{InProcessTransport, TransportHub};

/// Optional database endpoints wired into the failover manager at
/// construction time. Omit this to run a cluster with no database
/// failover subsystem (spec §4.7 has no hard dependency from the
/// scheduler or health monitor onto it).
pub struct DbEndpoints {
    pub endpoints: Vec<DatabaseEndpoint>,
    pub factory: Arc<dyn BackendFactory>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub node_id: NodeId,
    pub scheduler: SystemStatus,
    pub failover_phase: Option<FailoverPhase>,
    pub failover_current_endpoint: Option<String>,
}

pub struct Cluster {
    self_id: NodeId,
    scheduler: Arc<Scheduler>,
    registry: NodeRegistry,
    heartbeat: Arc<HeartbeatMonitor>,
    recovery: Arc<RecoveryDispatcher>,
    monitor: Arc<ResourceMonitor>,
    failover: Option<Arc<FailoverManager>>,
    failover_tick: Duration,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Cluster {
    pub async fn new(config: ClusterConfig, hub: &Arc<TransportHub>, db: Option<DbEndpoints>) -> ClusterResult<Arc<Self>> {
        let self_id = config.node.id.clone();
        let registry = NodeRegistry::new();
        registry.register(Node::new(self_id.clone(), config.node.display_name.clone(), config.node.address.clone(), config.node.port));

        let transport = hub.transport_for(self_id.clone());
        let scheduler = Scheduler::new(config.scheduler.to_config(), registry.clone());

        let scheduler_for_failures = scheduler.clone();
        let on_node_failed: Arc<dyn Fn(NodeId) + Send + Sync> = Arc::new(move |failed_node_id: NodeId| {
            let scheduler = scheduler_for_failures.clone();
            tokio::spawn(async move {
                scheduler.requeue_tasks_on_failed_node(&failed_node_id).await;
            });
        });

        let heartbeat = HeartbeatMonitor::new(
            self_id.clone(),
            registry.clone(),
            transport.clone() as Arc<dyn NodeTransport>,
            config.heartbeat.to_config(),
            on_node_failed,
        );
        let recovery = RecoveryDispatcher::new(registry.clone(), transport.clone() as Arc<dyn NodeTransport>, heartbeat.clone(), config.recovery.to_config());

        let monitor = ResourceMonitor::new(config.monitor.to_config());
        monitor.register_node(self_id.clone()).await;

        let scheduler_for_retries = scheduler.clone();
        scheduler
            .set_retry_callback(Arc::new(move |task_id: TaskId, _last_node_id: Option<NodeId>, _retry_count: u32| {
                let scheduler = scheduler_for_retries.clone();
                tokio::spawn(async move {
                    scheduler.requeue_for_retry(&task_id).await;
                });
            }))
            .await;

        let failover_tick = config.failover.health_check_interval_secs;
        let failover = match db {
            Some(DbEndpoints { endpoints, factory }) => {
                Some(FailoverManager::new(endpoints, factory, config.pool.to_config(), config.failover.to_config())?)
            }
            None => None,
        };

        Ok(Arc::new(Self {
            self_id,
            scheduler,
            registry,
            heartbeat,
            recovery,
            monitor,
            failover,
            failover_tick: Duration::from_secs(failover_tick),
            handles: Mutex::new(Vec::new()),
        }))
    }

    /// Spawns every background loop this cluster node owns. Idempotent
    /// only in the sense that calling it twice spawns a second set of
    /// loops; callers should call it exactly once per `Cluster`.
    pub fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock().expect("cluster handle list poisoned");
        handles.push(self.scheduler.spawn());
        handles.push(self.scheduler.spawn_timeout_checker());
        handles.push(self.scheduler.spawn_retry_worker());
        handles.push(self.heartbeat.spawn_emitter());
        handles.push(self.heartbeat.spawn_liveness_checker());
        handles.push(self.recovery.spawn());
        handles.push(self.monitor.spawn());
        if let Some(failover) = self.failover.clone() {
            let tick = self.failover_tick;
            handles.push(tokio::spawn(async move {
                info!("failover evaluator starting");
                loop {
                    failover.evaluate().await;
                    tokio::time::sleep(tick).await;
                }
            }));
        }
        info!(node_id = %self.self_id, "cluster started");
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    pub async fn submit(&self, task: Task) -> TaskId {
        self.scheduler.submit(task).await
    }

    pub async fn cancel(&self, task_id: &TaskId) -> bool {
        self.scheduler.cancel(task_id).await
    }

    pub async fn get_result(&self, task_id: &TaskId, timeout: Duration) -> ClusterResult<serde_json::Value> {
        Ok(self.scheduler.get_result(task_id, timeout).await?)
    }

    pub fn register_node(&self, node: Node) {
        self.registry.register(node);
    }

    pub async fn unregister_node(&self, node_id: &NodeId) -> ClusterResult<()> {
        Ok(self.scheduler.unregister_node(node_id).await?)
    }

    pub async fn db_borrow(&self) -> ClusterResult<taskfabric_db_pool::PooledConnection> {
        let failover = self.failover.as_ref().ok_or_else(|| ClusterError::InvalidArgument("no database endpoints configured".to_string()))?;
        Ok(failover.borrow_with_failover().await?)
    }

    pub async fn status(&self) -> ClusterStatus {
        let (failover_phase, failover_current_endpoint) = match &self.failover {
            Some(f) => (Some(f.phase().await), Some(f.current_endpoint_id().await)),
            None => (None, None),
        };
        ClusterStatus { node_id: self.self_id.clone(), scheduler: self.scheduler.system_status().await, failover_phase, failover_current_endpoint }
    }

    pub async fn resource_recommendations(&self, node_id: &str) -> Vec<String> {
        self.monitor.recommendations(node_id).await
    }

    /// Stops every background loop owned by this node and waits for them
    /// to exit, in reverse order of startup (spec §5 graceful shutdown:
    /// stop accepting new work first, then tear down the subsystems that
    /// depend on it).
    pub async fn shutdown(&self) {
        info!(node_id = %self.self_id, "cluster shutting down");
        self.scheduler.shutdown();
        if let Some(failover) = &self.failover {
            failover.shutdown().await;
        }
        self.monitor.shutdown();
        self.recovery.shutdown();
        self.heartbeat.shutdown();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().expect("cluster handle list poisoned"));
        for handle in handles {
            let _ = handle.await;
        }
        info!(node_id = %self.self_id, "cluster shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskfabric_core::{TaskArgs, TaskCallable};

    struct ConstCallable(serde_json::Value);
    #[async_trait::async_trait]
    impl TaskCallable for ConstCallable {
        async fn call(&self, _args: &TaskArgs) -> Result<serde_json::Value, String> {
            Ok(self.0.clone())
        }
    }

    async fn single_node_cluster() -> Arc<Cluster> {
        let mut config = ClusterConfig::default();
        config.node.id = "n1".to_string();
        config.scheduler.idle_sleep_secs = 0;
        config.scheduler.empty_candidates_sleep_secs = 0;
        let hub = TransportHub::new();
        let cluster = Cluster::new(config, &hub, None).await.unwrap();
        cluster.register_node(Node::new("n1".into(), "n1".into(), "127.0.0.1".into(), 9000));
        cluster.start();
        cluster
    }

    #[tokio::test]
    async fn happy_path_placement() {
        let cluster = single_node_cluster().await;
        let task = Task::new("t1", Arc::new(ConstCallable(serde_json::json!(42))), TaskArgs::default(), 0);
        let id = cluster.submit(task).await;
        let result = cluster.get_result(&id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(result, serde_json::json!(42));
        let status = cluster.status().await;
        assert_eq!(status.scheduler.completed, 1);
        cluster.shutdown().await;
    }

    struct SlowCallable(Duration);
    #[async_trait::async_trait]
    impl TaskCallable for SlowCallable {
        async fn call(&self, _args: &TaskArgs) -> Result<serde_json::Value, String> {
            tokio::time::sleep(self.0).await;
            Ok(serde_json::json!("done"))
        }
    }

    #[tokio::test]
    async fn orphaned_task_requeues_on_unregister() {
        let cluster = single_node_cluster().await;
        cluster.register_node(Node::new("n2".into(), "n2".into(), "127.0.0.1".into(), 9001));

        let task = Task::new("t1", Arc::new(SlowCallable(Duration::from_millis(150))), TaskArgs::default(), 0);
        let id = cluster.submit(task).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        cluster.unregister_node(&"n1".to_string()).await.unwrap();

        let result = cluster.get_result(&id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(result, serde_json::json!("done"));
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn db_borrow_without_endpoints_errors() {
        let cluster = single_node_cluster().await;
        let err = cluster.db_borrow().await.unwrap_err();
        assert!(matches!(err, ClusterError::InvalidArgument(_)));
        cluster.shutdown().await;
    }
}
