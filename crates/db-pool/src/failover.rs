//! Failover-aware database gateway (spec §4.7).
//!
//! The phase state machine and event-history bookkeeping are grounded
//! on the Anya-core `FailoverManager` (detect → elect → promote →
//! redirect, with a `FailoverEvent` log and a `current_phase` guard
//! against overlapping failovers); the endpoint table, policy
//! evaluation, and per-endpoint pool ownership are specific to spec
//! §4.7 and have no teacher counterpart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::backend::BackendFactory;
use crate::error::{DbPoolError, DbPoolResult};
use crate::pool::{ConnectionPool, PoolConfig, PooledConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverMode {
    Automatic,
    SemiAutomatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverPolicy {
    FailureCount,
    ResponseTime,
    HealthCheck,
    Combined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverPhase {
    Primary,
    FailingOver,
    Secondary,
    Recovering,
}

#[derive(Debug, Clone)]
pub struct FailoverConfig {
    pub mode: FailoverMode,
    pub policy: FailoverPolicy,
    pub max_failure_count: u32,
    pub failure_timeout: Duration,
    pub response_time_threshold: Duration,
    pub health_check_interval: Duration,
    pub failover_timeout: Duration,
    pub max_recovery_attempts: u32,
    pub recovery_check_interval: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            mode: FailoverMode::Automatic,
            policy: FailoverPolicy::Combined,
            max_failure_count: 3,
            failure_timeout: Duration::from_secs(30),
            response_time_threshold: Duration::from_millis(500),
            health_check_interval: Duration::from_secs(10),
            failover_timeout: Duration::from_secs(30),
            max_recovery_attempts: 5,
            recovery_check_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseEndpoint {
    pub id: String,
    pub name: String,
    pub connection_string: String,
    pub priority: u32,
    pub is_primary: bool,
    pub is_available: bool,
    pub last_health_check: Option<Instant>,
    pub failure_count: u32,
    pub last_failure: Option<String>,
    pub response_time: Duration,
}

impl DatabaseEndpoint {
    pub fn new(id: impl Into<String>, name: impl Into<String>, connection_string: impl Into<String>, priority: u32, is_primary: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            connection_string: connection_string.into(),
            priority,
            is_primary,
            is_available: true,
            last_health_check: None,
            failure_count: 0,
            last_failure: None,
            response_time: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub event_id: String,
    pub from_endpoint: String,
    pub to_endpoint: Option<String>,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub duration: Duration,
    pub success: bool,
    pub metadata: HashMap<String, String>,
}

struct EndpointState {
    endpoint: DatabaseEndpoint,
    pool: Arc<ConnectionPool>,
}

pub struct FailoverManager {
    config: FailoverConfig,
    endpoints: RwLock<Vec<EndpointState>>,
    current_endpoint_id: RwLock<String>,
    phase: RwLock<FailoverPhase>,
    history: RwLock<Vec<FailoverEvent>>,
}

impl FailoverManager {
    pub fn new(endpoints: Vec<DatabaseEndpoint>, factory: Arc<dyn BackendFactory>, pool_config: PoolConfig, config: FailoverConfig) -> DbPoolResult<Arc<Self>> {
        if endpoints.is_empty() {
            return Err(DbPoolError::InvalidArgument("failover manager requires at least one endpoint".to_string()));
        }
        let primary_id = endpoints
            .iter()
            .find(|e| e.is_primary)
            .or_else(|| endpoints.iter().min_by_key(|e| e.priority))
            .map(|e| e.id.clone())
            .expect("non-empty endpoint list");

        let states = endpoints
            .into_iter()
            .map(|endpoint| {
                let pool = ConnectionPool::new(endpoint.connection_string.clone(), factory.clone(), pool_config.clone());
                EndpointState { endpoint, pool }
            })
            .collect();

        Ok(Arc::new(Self {
            config,
            endpoints: RwLock::new(states),
            current_endpoint_id: RwLock::new(primary_id),
            phase: RwLock::new(FailoverPhase::Primary),
            history: RwLock::new(Vec::new()),
        }))
    }

    pub async fn current_endpoint_id(&self) -> String {
        self.current_endpoint_id.read().await.clone()
    }

    pub async fn phase(&self) -> FailoverPhase {
        *self.phase.read().await
    }

    pub async fn history(&self) -> Vec<FailoverEvent> {
        self.history.read().await.clone()
    }

    /// Borrows a connection from the current endpoint's pool. On
    /// failure the caller sees the original error; the manager records
    /// a connection failure against `current_endpoint_id` for the next
    /// policy evaluation to act on.
    pub async fn borrow_with_failover(&self) -> DbPoolResult<PooledConnection> {
        let current_id = self.current_endpoint_id().await;
        let pool = {
            let endpoints = self.endpoints.read().await;
            endpoints.iter().find(|e| e.endpoint.id == current_id).map(|e| e.pool.clone())
        };
        let Some(pool) = pool else { return Err(DbPoolError::EndpointUnavailable) };

        match pool.borrow().await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                self.record_failure(&current_id, &err.to_string()).await;
                Err(err)
            }
        }
    }

    async fn record_failure(&self, endpoint_id: &str, message: &str) {
        let mut endpoints = self.endpoints.write().await;
        if let Some(state) = endpoints.iter_mut().find(|e| e.endpoint.id == endpoint_id) {
            state.endpoint.failure_count += 1;
            state.endpoint.last_failure = Some(message.to_string());
        }
    }

    /// Health-checks every endpoint, then decides failover/recovery
    /// under the configured policy and mode (spec §4.7 step 2–3).
    pub async fn evaluate(&self) {
        self.health_check_all().await;

        if self.config.mode == FailoverMode::Manual {
            return;
        }

        let current_id = self.current_endpoint_id().await;
        let should_failover = self.should_failover(&current_id).await;

        if should_failover {
            let _ = self.trigger_failover(&current_id, "policy evaluation").await;
            return;
        }

        if *self.phase.read().await == FailoverPhase::Secondary {
            let primary_id = self.primary_id().await;
            if self.is_healthy(&primary_id).await {
                let _ = self.trigger_recovery().await;
            }
        }
    }

    async fn primary_id(&self) -> String {
        let endpoints = self.endpoints.read().await;
        endpoints
            .iter()
            .find(|e| e.endpoint.is_primary)
            .or_else(|| endpoints.iter().min_by_key(|e| e.endpoint.priority))
            .map(|e| e.endpoint.id.clone())
            .expect("non-empty endpoint list")
    }

    async fn is_healthy(&self, endpoint_id: &str) -> bool {
        let endpoints = self.endpoints.read().await;
        endpoints
            .iter()
            .find(|e| e.endpoint.id == endpoint_id)
            .map(|e| e.endpoint.is_available && e.endpoint.response_time <= self.config.response_time_threshold && e.endpoint.failure_count == 0)
            .unwrap_or(false)
    }

    async fn health_check_all(&self) {
        let snapshot: Vec<(String, Arc<ConnectionPool>)> = {
            let endpoints = self.endpoints.read().await;
            endpoints.iter().map(|e| (e.endpoint.id.clone(), e.pool.clone())).collect()
        };

        for (id, pool) in snapshot {
            let start = Instant::now();
            let probe = pool.borrow().await;
            let elapsed = start.elapsed();
            let mut endpoints = self.endpoints.write().await;
            let Some(state) = endpoints.iter_mut().find(|e| e.endpoint.id == id) else { continue };
            state.endpoint.last_health_check = Some(Instant::now());
            state.endpoint.response_time = elapsed;
            match probe {
                Ok(conn) => {
                    if state.endpoint.failure_count > 0 {
                        info!(endpoint = %id, "endpoint recovered");
                    }
                    state.endpoint.is_available = true;
                    state.endpoint.failure_count = 0;
                    drop(conn);
                }
                Err(err) => {
                    warn!(endpoint = %id, error = %err, "health check failed");
                    state.endpoint.is_available = false;
                    state.endpoint.failure_count += 1;
                    state.endpoint.last_failure = Some(err.to_string());
                }
            }
        }
    }

    async fn should_failover(&self, endpoint_id: &str) -> bool {
        let endpoints = self.endpoints.read().await;
        let Some(state) = endpoints.iter().find(|e| e.endpoint.id == endpoint_id) else { return false };
        let endpoint = &state.endpoint;
        match self.config.policy {
            FailoverPolicy::FailureCount => endpoint.failure_count >= self.config.max_failure_count,
            FailoverPolicy::ResponseTime => endpoint.response_time > self.config.response_time_threshold,
            FailoverPolicy::HealthCheck => !endpoint.is_available,
            FailoverPolicy::Combined => {
                endpoint.failure_count >= self.config.max_failure_count
                    || endpoint.response_time > self.config.response_time_threshold
                    || !endpoint.is_available
            }
        }
    }

    /// Explicit manual trigger (spec §4.7 `trigger_failover()`).
    /// Returns false if no alternative endpoint is available.
    pub async fn trigger_failover(&self, from_endpoint: &str, reason: &str) -> bool {
        *self.phase.write().await = FailoverPhase::FailingOver;
        let start = Instant::now();

        let next = self.pick_next_endpoint(from_endpoint).await;
        let Some(next_id) = next else {
            self.record_event(from_endpoint, None, reason, start.elapsed(), false).await;
            *self.phase.write().await = FailoverPhase::Primary;
            return false;
        };

        let probe_ok = {
            let pool = {
                let endpoints = self.endpoints.read().await;
                endpoints.iter().find(|e| e.endpoint.id == next_id).map(|e| e.pool.clone())
            };
            match pool {
                Some(pool) => pool.borrow().await.is_ok(),
                None => false,
            }
        };

        if probe_ok {
            *self.current_endpoint_id.write().await = next_id.clone();
            *self.phase.write().await = FailoverPhase::Secondary;
            self.record_event(from_endpoint, Some(next_id.clone()), reason, start.elapsed(), true).await;
            info!(from = %from_endpoint, to = %next_id, "failover succeeded");
            true
        } else {
            *self.phase.write().await = FailoverPhase::Primary;
            self.record_event(from_endpoint, Some(next_id), reason, start.elapsed(), false).await;
            false
        }
    }

    async fn pick_next_endpoint(&self, exclude: &str) -> Option<String> {
        let endpoints = self.endpoints.read().await;
        endpoints
            .iter()
            .filter(|e| e.endpoint.is_available && e.endpoint.id != exclude)
            .min_by_key(|e| e.endpoint.priority)
            .map(|e| e.endpoint.id.clone())
    }

    /// Explicit manual trigger (spec §4.7 `trigger_recovery()`):
    /// transitions back to the primary once it is confirmed healthy.
    pub async fn trigger_recovery(&self) -> bool {
        *self.phase.write().await = FailoverPhase::Recovering;
        let start = Instant::now();
        let primary_id = self.primary_id().await;
        let from = self.current_endpoint_id().await;

        if !self.is_healthy(&primary_id).await {
            *self.phase.write().await = FailoverPhase::Secondary;
            return false;
        }

        *self.current_endpoint_id.write().await = primary_id.clone();
        *self.phase.write().await = FailoverPhase::Primary;
        self.record_event(&from, Some(primary_id), "primary recovered", start.elapsed(), true).await;
        true
    }

    async fn record_event(&self, from: &str, to: Option<String>, reason: &str, duration: Duration, success: bool) {
        let event = FailoverEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            from_endpoint: from.to_string(),
            to_endpoint: to,
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
            duration,
            success,
            metadata: HashMap::new(),
        };
        self.history.write().await.push(event);
    }

    pub async fn shutdown(&self) {
        let endpoints = self.endpoints.read().await;
        for state in endpoints.iter() {
            state.pool.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::FakeBackendFactory;

    fn endpoints() -> Vec<DatabaseEndpoint> {
        vec![
            DatabaseEndpoint::new("primary", "primary", "fake://primary", 0, true),
            DatabaseEndpoint::new("secondary", "secondary", "fake://secondary", 1, false),
        ]
    }

    #[tokio::test]
    async fn failover_switches_to_healthy_secondary() {
        let factory = Arc::new(FakeBackendFactory::new(true));
        let manager = FailoverManager::new(endpoints(), factory, PoolConfig::default(), FailoverConfig::default()).unwrap();

        assert_eq!(manager.current_endpoint_id().await, "primary");
        let ok = manager.trigger_failover("primary", "manual test").await;
        assert!(ok);
        assert_eq!(manager.current_endpoint_id().await, "secondary");
        assert_eq!(manager.phase().await, FailoverPhase::Secondary);
        assert_eq!(manager.history().await.len(), 1);
    }

    #[tokio::test]
    async fn failover_with_no_available_alternative_returns_false() {
        let factory = Arc::new(FakeBackendFactory::new(true));
        let manager = FailoverManager::new(vec![DatabaseEndpoint::new("only", "only", "fake://only", 0, true)], factory, PoolConfig::default(), FailoverConfig::default()).unwrap();
        let ok = manager.trigger_failover("only", "manual test").await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn recovery_switches_back_to_healthy_primary() {
        let factory = Arc::new(FakeBackendFactory::new(true));
        let manager = FailoverManager::new(endpoints(), factory, PoolConfig::default(), FailoverConfig::default()).unwrap();
        manager.trigger_failover("primary", "manual test").await;
        manager.health_check_all().await;
        let ok = manager.trigger_recovery().await;
        assert!(ok);
        assert_eq!(manager.current_endpoint_id().await, "primary");
    }
}
