//! Bounded hand-off between transport callbacks and the daemon.
//!
//! Transports push into an mpsc channel and never run handler code
//! themselves; a single consumer task drains the channel sequentially,
//! bounding each handler invocation with a timeout so one stuck message
//! cannot wedge the pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{InboundHandler, InboundMessage, TransportError};

/// Producer half handed to transport implementations.
#[derive(Clone)]
pub struct InboundSender {
    tx: mpsc::Sender<InboundMessage>,
}

impl InboundSender {
    /// Queue a message for the consumer. Fails when the queue is full
    /// rather than blocking the transport callback.
    pub fn send(&self, message: InboundMessage) -> Result<(), TransportError> {
        self.tx.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(msg) => {
                warn!(topic = %msg.topic, "Inbound queue full, dropping message");
                TransportError::Publish("inbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => TransportError::NotRunning,
        })
    }
}

pub struct TransportBridge {
    rx: mpsc::Receiver<InboundMessage>,
    handler_timeout: Duration,
}

impl TransportBridge {
    pub fn new(capacity: usize, handler_timeout: Duration) -> (InboundSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            InboundSender { tx },
            Self {
                rx,
                handler_timeout,
            },
        )
    }

    /// Spawn the consumer loop. It drains the queue one message at a time
    /// and exits when the shutdown signal fires or all senders are gone.
    pub fn spawn(
        mut self,
        handler: Arc<dyn InboundHandler>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = self.rx.recv() => {
                        let Some(message) = message else {
                            info!("Inbound queue closed, consumer exiting");
                            return;
                        };
                        let topic = message.topic.clone();
                        debug!(topic = %topic, "Dispatching inbound message");
                        if tokio::time::timeout(self.handler_timeout, handler.handle(message))
                            .await
                            .is_err()
                        {
                            warn!(topic = %topic, "Inbound handler timed out, skipping message");
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("Transport bridge shutting down");
                        return;
                    }
                }
            }
        })
    }
}
