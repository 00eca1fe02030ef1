//! Heartbeat emission, remote heartbeat handling, and the liveness check
//! that drives the node health state machine (spec §4.2).
//!
//! Grounded on `layer1::system_monitor::SystemMonitor`'s periodic
//! `tokio::spawn` loop shape and `HealthTracker`'s failure counting
//! (`other_examples` heartbeat.rs), generalized from a single backend to
//! N peers addressed through `NodeTransport`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use taskfabric_core::{FailureKind, NodeId, NodeStatus};

use crate::registry::NodeRegistry;
use crate::transport::{
    FailureNotificationPayload, HeartbeatPayload, MessageHandler, MessageType, NodeTransport, TransportMessage,
};

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Emission period, H in spec §4.2 (default 10s).
    pub interval: Duration,
    /// Liveness cutoff; a peer is unreachable once `2 * heartbeat_timeout`
    /// has elapsed since its last heartbeat.
    pub heartbeat_timeout: Duration,
    /// Consecutive failures to promote INACTIVE → FAILED.
    pub max_node_failures: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(10),
            max_node_failures: 3,
        }
    }
}

fn status_to_wire(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Available => "available",
        NodeStatus::Busy => "busy",
        NodeStatus::Offline => "offline",
        NodeStatus::Maintenance => "maintenance",
        NodeStatus::Failed => "failed",
        NodeStatus::Recovering => "recovering",
        NodeStatus::Inactive => "inactive",
    }
}

/// Maps an unrecognized wire status string to `Available`, per spec
/// §4.2 "map message-status string to enum (unknown → ACTIVE)".
fn status_from_wire(s: &str) -> NodeStatus {
    match s {
        "available" => NodeStatus::Available,
        "busy" => NodeStatus::Busy,
        "offline" => NodeStatus::Offline,
        "maintenance" => NodeStatus::Maintenance,
        "failed" => NodeStatus::Failed,
        "recovering" => NodeStatus::Recovering,
        "inactive" => NodeStatus::Inactive,
        other => {
            warn!(value = other, "unrecognized node status on wire, defaulting to available");
            NodeStatus::Available
        }
    }
}

fn now_as_epoch_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

fn is_reachable(status: NodeStatus) -> bool {
    !matches!(status, NodeStatus::Failed | NodeStatus::Offline)
}

/// Emits local heartbeats, answers remote ones, and runs the liveness
/// check that promotes unresponsive peers through
/// `INACTIVE → FAILED` (spec §4.2 state machine).
pub struct HeartbeatMonitor {
    self_id: NodeId,
    registry: NodeRegistry,
    transport: Arc<dyn NodeTransport>,
    config: HeartbeatConfig,
    shutdown: Arc<AtomicBool>,
    on_node_failed: Arc<dyn Fn(NodeId) + Send + Sync>,
}

impl HeartbeatMonitor {
    pub fn new(
        self_id: NodeId,
        registry: NodeRegistry,
        transport: Arc<dyn NodeTransport>,
        config: HeartbeatConfig,
        on_node_failed: Arc<dyn Fn(NodeId) + Send + Sync>,
    ) -> Arc<Self> {
        let monitor = Arc::new(Self {
            self_id,
            registry,
            transport,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            on_node_failed,
        });
        monitor.transport.register_handler(MessageType::Heartbeat, monitor.clone() as Arc<dyn MessageHandler>);
        monitor.transport.register_handler(MessageType::HeartbeatResponse, monitor.clone() as Arc<dyn MessageHandler>);
        monitor
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn spawn_emitter(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!("heartbeat emitter starting");
            while !this.shutdown.load(Ordering::Relaxed) {
                this.registry.record_heartbeat(&this.self_id, Instant::now());
                let own_status = this.registry.get(&this.self_id).map(|n| n.status).unwrap_or(NodeStatus::Available);
                let payload = HeartbeatPayload {
                    node_id: this.self_id.clone(),
                    timestamp: now_as_epoch_seconds(),
                    status: status_to_wire(own_status).to_string(),
                };
                let message = TransportMessage {
                    message_type: MessageType::Heartbeat,
                    data: serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
                };
                for peer_id in this.registry.ids() {
                    if peer_id == this.self_id {
                        continue;
                    }
                    let Some(peer) = this.registry.get(&peer_id) else { continue };
                    if !is_reachable(peer.status) {
                        continue;
                    }
                    if let Err(err) = this.transport.send(&peer_id, message.clone()).await {
                        warn!(node_id = %peer_id, error = %err, "heartbeat send failed");
                    }
                }
                tokio::time::sleep(this.config.interval).await;
            }
            info!("heartbeat emitter stopped");
        })
    }

    pub fn spawn_liveness_checker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!("liveness checker starting");
            let period = this.config.interval / 2;
            while !this.shutdown.load(Ordering::Relaxed) {
                this.check_liveness().await;
                tokio::time::sleep(period).await;
            }
            info!("liveness checker stopped");
        })
    }

    async fn check_liveness(&self) {
        let cutoff = self.config.heartbeat_timeout * 2;
        let now = Instant::now();
        for peer_id in self.registry.ids() {
            if peer_id == self.self_id {
                continue;
            }
            let Some(peer) = self.registry.get(&peer_id) else { continue };
            if peer.status == NodeStatus::Failed {
                continue;
            }
            if now.saturating_duration_since(peer.last_heartbeat) > cutoff {
                self.register_failure(&peer_id, FailureKind::NodeUnreachable).await;
            }
        }
    }

    async fn register_failure(&self, node_id: &NodeId, kind: FailureKind) {
        let Some(consecutive) = self.registry.record_failure(node_id, kind, Instant::now()) else { return };
        if consecutive >= self.config.max_node_failures {
            self.registry.set_status(node_id, NodeStatus::Failed);
            warn!(node_id = %node_id, consecutive_failures = consecutive, "node marked FAILED");
            self.broadcast_failure(node_id, kind).await;
            (self.on_node_failed)(node_id.clone());
        } else {
            self.registry.set_status(node_id, NodeStatus::Inactive);
            debug!(node_id = %node_id, consecutive_failures = consecutive, "node marked INACTIVE");
        }
    }

    /// Broadcasts a failure notification to every reachable peer except
    /// the failing node itself and this monitor's own id — the fix for
    /// spec §9's self-compare bug (`node_id != node_id` is always
    /// false in the source; the intended filter excludes the failing
    /// node and the sender from the recipient set).
    async fn broadcast_failure(&self, failing_node_id: &NodeId, kind: FailureKind) {
        let payload = FailureNotificationPayload {
            node_id: failing_node_id.clone(),
            failure_type: format!("{kind:?}"),
            error_message: format!("node {failing_node_id} exceeded failure threshold"),
            timestamp: now_as_epoch_seconds(),
        };
        let message = TransportMessage {
            message_type: MessageType::FailureNotification,
            data: serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
        };
        for peer_id in self.registry.ids() {
            if &peer_id == failing_node_id || peer_id == self.self_id {
                continue;
            }
            let Some(peer) = self.registry.get(&peer_id) else { continue };
            if !is_reachable(peer.status) {
                continue;
            }
            if let Err(err) = self.transport.send(&peer_id, message.clone()).await {
                warn!(node_id = %peer_id, error = %err, "failure notification send failed");
            }
        }
    }

    /// Called by the recovery dispatcher when a strategy reports success:
    /// resets failure counters and returns the node to `Available`.
    pub fn mark_recovered(&self, node_id: &NodeId) {
        self.registry.reset_failures(node_id);
        self.registry.set_status(node_id, NodeStatus::Available);
        info!(node_id = %node_id, "node recovered");
    }
}

#[async_trait]
impl MessageHandler for HeartbeatMonitor {
    async fn handle(&self, from: NodeId, message: TransportMessage) {
        let Ok(payload) = serde_json::from_value::<HeartbeatPayload>(message.data.clone()) else {
            warn!(node_id = %from, "malformed heartbeat payload");
            return;
        };

        // Liveness decisions use the local monotonic receive time, never
        // the remote-supplied timestamp (spec §9: heartbeat echoes that
        // re-apply a remote timestamp are unsafe under clock skew).
        let received_at = Instant::now();
        let status = status_from_wire(&payload.status);

        if self.registry.get(&from).is_none() {
            self.registry.register(taskfabric_core::Node::new(from.clone(), from.clone(), String::new(), 0));
        }
        self.registry.record_heartbeat(&from, received_at);
        self.registry.set_status(&from, status);
        self.registry.reset_failures(&from);

        if message.message_type == MessageType::Heartbeat {
            let own_status = self.registry.get(&self.self_id).map(|n| n.status).unwrap_or(NodeStatus::Available);
            let response = TransportMessage {
                message_type: MessageType::HeartbeatResponse,
                data: serde_json::to_value(&HeartbeatPayload {
                    node_id: self.self_id.clone(),
                    timestamp: now_as_epoch_seconds(),
                    status: status_to_wire(own_status).to_string(),
                })
                .unwrap_or(serde_json::Value::Null),
            };
            if let Err(err) = self.transport.send(&from, response).await {
                warn!(node_id = %from, error = %err, "heartbeat response send failed");
            }
        }
    }
}
