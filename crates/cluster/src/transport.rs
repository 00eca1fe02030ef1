//! In-process `NodeTransport`: every node in a simulated cluster lives
//! in the same process and is addressed through a shared
//! [`TransportHub`] rather than a socket (spec.md's HTTP/RPC surface is
//! explicitly out of scope; this is the transport seam the fault
//! tolerance crate's `NodeTransport` trait was designed for).
//!
//! Grounded on `taskfabric_fault_tolerance::transport::HandlerTable`'s
//! own doc comment, which names this exact use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use taskfabric_core::NodeId;
use taskfabric_fault_tolerance::{FaultToleranceError, FtResult, HandlerTable, MessageHandler, MessageType, NodeTransport, TransportMessage};

/// Process-wide registry of per-node handler tables. One hub is shared
/// by every [`InProcessTransport`] in a simulated cluster.
#[derive(Default)]
pub struct TransportHub {
    tables: Mutex<HashMap<NodeId, Arc<HandlerTable>>>,
}

impl TransportHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns this node's transport handle, registering its handler
    /// table with the hub so other nodes' `send` calls can reach it.
    pub fn transport_for(self: &Arc<Self>, node_id: NodeId) -> Arc<InProcessTransport> {
        let table = Arc::new(HandlerTable::new());
        self.tables.lock().expect("transport hub poisoned").insert(node_id.clone(), table.clone());
        Arc::new(InProcessTransport { self_id: node_id, hub: self.clone(), table })
    }
}

pub struct InProcessTransport {
    self_id: NodeId,
    hub: Arc<TransportHub>,
    table: Arc<HandlerTable>,
}

#[async_trait]
impl NodeTransport for InProcessTransport {
    async fn send(&self, target_node_id: &NodeId, message: TransportMessage) -> FtResult<()> {
        let target_table = { self.hub.tables.lock().expect("transport hub poisoned").get(target_node_id).cloned() };
        let Some(target_table) = target_table else {
            return Err(FaultToleranceError::TransportError(format!("no such node: {target_node_id}")));
        };
        target_table.dispatch(message.message_type, self.self_id.clone(), message).await;
        Ok(())
    }

    fn register_handler(&self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        self.table.register(message_type, handler);
    }
}
