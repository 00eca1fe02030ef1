//! Recovery strategy dispatch for FAILED nodes (spec §4.2).
//!
//! A strategy is chosen from the node's `last_failure_kind`; success is
//! signalled by the probe/request actually reaching the peer (the
//! transport's `send` succeeding) — the same stand-in the example
//! failover manager uses for `verify_node_failure` (`other_examples`
//! Anya `failover.rs`, which simulates the check rather than performing
//! a real network probe).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use taskfabric_core::{FailureKind, NodeId, NodeStatus};

use crate::heartbeat::HeartbeatMonitor;
use crate::registry::NodeRegistry;
use crate::transport::{MessageType, NodeTransport, TransportMessage};

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub check_interval: Duration,
    pub max_recovery_attempts: u32,
    /// Multiplier for the `base * 2^recovery_attempts` backoff.
    pub backoff_base: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { check_interval: Duration::from_secs(5), max_recovery_attempts: 5, backoff_base: 2.0 }
    }
}

fn request_for(kind: FailureKind) -> MessageType {
    match kind {
        FailureKind::NodeUnreachable => MessageType::Ping,
        FailureKind::TaskTimeout | FailureKind::NetworkError => MessageType::Ping,
        FailureKind::MemoryError => MessageType::MemoryCleanupRequest,
        FailureKind::SystemError => MessageType::SystemRestartRequest,
        FailureKind::Unknown => MessageType::Ping,
    }
}

pub struct RecoveryDispatcher {
    registry: NodeRegistry,
    transport: Arc<dyn NodeTransport>,
    heartbeat_monitor: Arc<HeartbeatMonitor>,
    config: RecoveryConfig,
    scheduled_at: Mutex<HashMap<NodeId, Instant>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

impl RecoveryDispatcher {
    pub fn new(
        registry: NodeRegistry,
        transport: Arc<dyn NodeTransport>,
        heartbeat_monitor: Arc<HeartbeatMonitor>,
        config: RecoveryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            transport,
            heartbeat_monitor,
            config,
            scheduled_at: Mutex::new(HashMap::new()),
            shutdown: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!("recovery dispatcher starting");
            while !this.shutdown.load(std::sync::atomic::Ordering::Relaxed) {
                this.tick().await;
                tokio::time::sleep(this.config.check_interval).await;
            }
            info!("recovery dispatcher stopped");
        })
    }

    async fn tick(&self) {
        let now = Instant::now();
        for node_id in self.registry.ids() {
            let Some(node) = self.registry.get(&node_id) else { continue };
            if node.status != NodeStatus::Failed {
                continue;
            }
            if node.recovery_attempts >= self.config.max_recovery_attempts {
                continue;
            }
            let due = {
                let scheduled = self.scheduled_at.lock().expect("recovery schedule poisoned");
                scheduled.get(&node_id).copied()
            };
            if due.is_some_and(|t| now < t) {
                continue;
            }
            self.attempt_recovery(&node_id, node.last_failure_kind.unwrap_or(FailureKind::Unknown)).await;
        }
    }

    async fn attempt_recovery(&self, node_id: &NodeId, kind: FailureKind) {
        self.registry.set_status(node_id, NodeStatus::Recovering);
        let message = TransportMessage { message_type: request_for(kind), data: serde_json::Value::Null };

        match self.transport.send(node_id, message).await {
            Ok(()) => {
                info!(node_id = %node_id, ?kind, "recovery probe succeeded");
                self.heartbeat_monitor.mark_recovered(node_id);
                self.scheduled_at.lock().expect("recovery schedule poisoned").remove(node_id);
            }
            Err(err) => {
                warn!(node_id = %node_id, ?kind, error = %err, "recovery probe failed");
                self.registry.set_status(node_id, NodeStatus::Failed);
                self.registry.bump_recovery_attempts(node_id);
                let attempts_now = self.registry.get(node_id).map(|n| n.recovery_attempts).unwrap_or(1);
                let delay = Duration::from_secs_f64(self.config.backoff_base * 2f64.powi(attempts_now as i32));
                self.scheduled_at.lock().expect("recovery schedule poisoned").insert(node_id.clone(), Instant::now() + delay);
            }
        }
    }
}
