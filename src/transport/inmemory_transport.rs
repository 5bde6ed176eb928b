use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Message, Transport};

const CHANNEL_CAPACITY: usize = 100;

/// Channel-backed transport used to exercise the serve loop in tests.
#[derive(Clone)]
pub struct ServerInMemoryTransport {
    rx: Arc<Mutex<Receiver<Message>>>,
    tx: Sender<Message>,
}

impl ServerInMemoryTransport {
    /// Build a transport plus the peer's ends: a sender feeding the
    /// transport's inbox and a receiver observing everything it sends.
    pub fn pair() -> (Self, Sender<Message>, Receiver<Message>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let transport = Self {
            rx: Arc::new(Mutex::new(inbound_rx)),
            tx: outbound_tx,
        };
        (transport, inbound_tx, outbound_rx)
    }
}

#[async_trait]
impl Transport for ServerInMemoryTransport {
    async fn receive(&self) -> Result<Option<Message>> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(message) => {
                debug!("Server received: {:?}", message);
                Ok(Some(message))
            }
            None => {
                debug!("Peer channel closed");
                Ok(None)
            }
        }
    }

    async fn send(&self, message: &Message) -> Result<()> {
        debug!("Server sending: {:?}", message);
        self.tx
            .send(message.clone())
            .await
            .map_err(|e| anyhow::anyhow!("failed to send message: {e}"))?;
        Ok(())
    }

    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
