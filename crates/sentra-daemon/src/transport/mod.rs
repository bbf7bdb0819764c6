//! Transport bridge and device supervision.
//!
//! Inbound device traffic is handed off through a bounded queue and
//! drained by a single sequential consumer, so per-device message order
//! is preserved end to end. A background supervisor demotes devices that
//! go quiet.

pub mod bridge;
pub mod ingest;
pub mod local;
pub mod supervisor;

use async_trait::async_trait;

pub use bridge::{InboundSender, TransportBridge};
pub use ingest::Ingestor;
pub use local::LocalBus;
pub use supervisor::spawn_liveness_task;

/// One message received from a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Transport not running")]
    NotRunning,
}

/// Outbound side of a device transport.
///
/// The daemon only ever publishes through this seam; the concrete wire
/// protocol lives behind it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;
}

/// Handler invoked for each inbound message, one at a time.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage);
}
