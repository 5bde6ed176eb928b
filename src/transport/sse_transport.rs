use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::debug;

use super::error::TransportError;
use super::{Message, Transport};

const CHANNEL_CAPACITY: usize = 100;

/// Per-session server transport for the SSE binding.
///
/// Inbound messages arrive from HTTP POSTs and are queued on an mpsc
/// channel; outbound messages fan out on a broadcast channel that the SSE
/// response stream subscribes to.
#[derive(Clone)]
pub struct ServerSseTransport {
    message_rx: Arc<Mutex<mpsc::Receiver<Message>>>,
    message_tx: mpsc::Sender<Message>,
    sse_tx: broadcast::Sender<Message>,
}

impl ServerSseTransport {
    pub fn new(sse_tx: broadcast::Sender<Message>) -> Self {
        let (message_tx, message_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            message_rx: Arc::new(Mutex::new(message_rx)),
            message_tx,
            sse_tx,
        }
    }

    /// Queue a message that arrived over the session's POST endpoint.
    pub async fn send_message(&self, message: Message) -> Result<()> {
        self.message_tx
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// Subscribe to the outbound event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sse_tx.subscribe()
    }
}

#[async_trait]
impl Transport for ServerSseTransport {
    async fn receive(&self) -> Result<Option<Message>> {
        let mut rx = self.message_rx.lock().await;
        match rx.recv().await {
            Some(message) => {
                debug!("Received message from POST request: {:?}", message);
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    async fn send(&self, message: &Message) -> Result<()> {
        self.sse_tx
            .send(message.clone())
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
