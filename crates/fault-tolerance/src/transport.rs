//! Node transport abstraction (spec §6, §9 "duck-typed backends" →
//! narrow capability set): `send(target, message)` and
//! `register_handler(type, handler)`. Concrete transports (in-process,
//! network) implement this trait; this crate only depends on it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskfabric_core::NodeId;

use crate::error::FtResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Heartbeat,
    HeartbeatResponse,
    FailureNotification,
    RecoveryNotification,
    Ping,
    MemoryCleanupRequest,
    SystemRestartRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub node_id: NodeId,
    pub timestamp: f64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureNotificationPayload {
    pub node_id: NodeId,
    pub failure_type: String,
    pub error_message: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryNotificationPayload {
    pub node_id: NodeId,
    pub timestamp: f64,
}

/// `{send(target, message), register_handler(type, handler)}` from spec
/// §9's database/transport capability-set redesign note.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn send(&self, target_node_id: &NodeId, message: TransportMessage) -> FtResult<()>;

    fn register_handler(&self, message_type: MessageType, handler: Arc<dyn MessageHandler>);
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, from: NodeId, message: TransportMessage);
}

/// Handler table shared by transport implementations that need dispatch
/// by message type but nothing fancier (used by `InProcessTransport` in
/// `taskfabric-cluster`).
#[derive(Default)]
pub struct HandlerTable {
    handlers: std::sync::Mutex<HashMap<MessageType, Vec<Arc<dyn MessageHandler>>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self { handlers: std::sync::Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        self.handlers.lock().expect("handler table poisoned").entry(message_type).or_default().push(handler);
    }

    pub async fn dispatch(&self, message_type: MessageType, from: NodeId, message: TransportMessage) {
        let handlers = {
            let table = self.handlers.lock().expect("handler table poisoned");
            table.get(&message_type).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler.handle(from.clone(), message.clone()).await;
        }
    }
}
