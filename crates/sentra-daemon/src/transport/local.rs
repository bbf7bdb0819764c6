//! In-process transport.
//!
//! Carries the daemon's publishes and simulated device traffic over
//! channels. Used by the test suite and by single-binary deployments
//! where devices are driven from the same process.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use super::{InboundMessage, InboundSender, Transport, TransportError};

pub struct LocalBus {
    inbound: InboundSender,
    outbound: broadcast::Sender<InboundMessage>,
    published: Mutex<Vec<InboundMessage>>,
}

impl LocalBus {
    pub fn new(inbound: InboundSender) -> Self {
        let (outbound, _) = broadcast::channel(256);
        Self {
            inbound,
            outbound,
            published: Mutex::new(Vec::new()),
        }
    }

    /// Deliver a message as if a device had published it.
    pub fn device_publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.inbound.send(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
    }

    /// Observe daemon-to-device publishes.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.outbound.subscribe()
    }

    /// Snapshot of everything the daemon has published so far.
    pub fn published(&self) -> Vec<InboundMessage> {
        self.published
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for LocalBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        debug!(topic, bytes = payload.len(), "Local bus publish");
        let message = InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
        if let Ok(mut guard) = self.published.lock() {
            guard.push(message.clone());
        }
        // No subscribers is fine; publishes are still recorded.
        let _ = self.outbound.send(message);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::transport::TransportBridge;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_is_recorded_and_broadcast() {
        let (sender, _bridge) = TransportBridge::new(16, Duration::from_secs(5));
        let bus = LocalBus::new(sender);
        let mut rx = bus.subscribe();

        bus.publish("devices/d1/control", b"{\"type\":\"ping\"}")
            .await
            .unwrap();

        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.topic, "devices/d1/control");
        assert_eq!(bus.published().len(), 1);
    }
}
