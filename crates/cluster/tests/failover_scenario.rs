//! End-to-end database failover scenario against the composed
//! `Cluster` (spec.md §8 scenario 5: consecutive probe failures on the
//! primary endpoint trigger failover to a healthy secondary, and
//! recovery switches back once the primary heals).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use taskfabric_cluster::{Cluster, ClusterConfig, DbEndpoints, TransportHub};
use taskfabric_db_pool::{BackendFactory, DatabaseEndpoint, DbBackend, DbPoolError, DbPoolResult, FailoverPhase, QueryResult};

#[derive(Debug)]
struct ToggleBackend {
    healthy: Arc<AtomicBool>,
}

#[async_trait]
impl DbBackend for ToggleBackend {
    async fn execute(&self, _query: &str, _params: &[serde_json::Value]) -> DbPoolResult<QueryResult> {
        if self.healthy.load(Ordering::Relaxed) {
            Ok(QueryResult { rows_affected: 0, rows: Vec::new() })
        } else {
            Err(DbPoolError::BackendError("endpoint down".to_string()))
        }
    }

    async fn ping(&self) -> DbPoolResult<()> {
        if self.healthy.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(DbPoolError::BackendError("endpoint down".to_string()))
        }
    }

    async fn close(&self) -> DbPoolResult<()> {
        Ok(())
    }
}

/// Hands out a backend whose health flag is selected by which endpoint
/// the connection string names, since `FailoverManager` builds every
/// endpoint's pool from one shared factory.
struct PerEndpointFactory {
    primary_healthy: Arc<AtomicBool>,
    secondary_healthy: Arc<AtomicBool>,
}

#[async_trait]
impl BackendFactory for PerEndpointFactory {
    async fn connect(&self, connection_string: &str) -> DbPoolResult<Box<dyn DbBackend>> {
        let healthy = if connection_string.contains("primary") { self.primary_healthy.clone() } else { self.secondary_healthy.clone() };
        if healthy.load(Ordering::Relaxed) {
            Ok(Box::new(ToggleBackend { healthy }))
        } else {
            Err(DbPoolError::BackendError("connect failed".to_string()))
        }
    }
}

#[tokio::test]
async fn failover_to_secondary_then_recovery_to_primary() {
    let mut config = ClusterConfig::default();
    config.node.id = "n1".to_string();
    config.failover.max_failure_count = 2;
    config.failover.health_check_interval_secs = 0;

    let primary_healthy = Arc::new(AtomicBool::new(false));
    let secondary_healthy = Arc::new(AtomicBool::new(true));
    let factory = Arc::new(PerEndpointFactory { primary_healthy: primary_healthy.clone(), secondary_healthy: secondary_healthy.clone() });

    let endpoints = vec![
        DatabaseEndpoint::new("primary", "primary", "postgres://primary", 1, true),
        DatabaseEndpoint::new("secondary", "secondary", "postgres://secondary", 2, false),
    ];

    let hub = TransportHub::new();
    let cluster = Cluster::new(config, &hub, Some(DbEndpoints { endpoints, factory })).await.unwrap();
    cluster.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = cluster.status().await;
    assert_eq!(status.failover_phase, Some(FailoverPhase::Secondary));
    assert_eq!(status.failover_current_endpoint.as_deref(), Some("secondary"));

    primary_healthy.store(true, Ordering::Relaxed);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = cluster.status().await;
    assert_eq!(status.failover_phase, Some(FailoverPhase::Primary));
    assert_eq!(status.failover_current_endpoint.as_deref(), Some("primary"));

    cluster.shutdown().await;
}
