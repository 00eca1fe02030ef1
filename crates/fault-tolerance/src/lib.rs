//! Node registry, heartbeat/health monitoring, and recovery dispatch
//! (spec §2, §4.2). No scheduling knowledge lives here; the scheduler
//! depends on this crate's `NodeRegistry`, never the reverse.

pub mod error;
pub mod heartbeat;
pub mod recovery;
pub mod registry;
pub mod transport;

pub use error::{FaultToleranceError, FtResult};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor};
pub use recovery::{RecoveryConfig, RecoveryDispatcher};
pub use registry::NodeRegistry;
pub use transport::{
    FailureNotificationPayload, HandlerTable, HeartbeatPayload, MessageHandler, MessageType,
    NodeTransport, RecoveryNotificationPayload, TransportMessage,
};
