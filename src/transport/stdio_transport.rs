use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Message, Transport};

/// Newline-delimited JSON over the process stdin/stdout.
///
/// The reader is held for the lifetime of the transport so buffered input is
/// never dropped between `receive` calls. Logging must go to stderr when this
/// transport is active.
#[derive(Clone)]
pub struct ServerStdioTransport {
    reader: Arc<Mutex<BufReader<Stdin>>>,
    writer: Arc<Mutex<Stdout>>,
}

impl Default for ServerStdioTransport {
    fn default() -> Self {
        Self {
            reader: Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()))),
            writer: Arc::new(Mutex::new(tokio::io::stdout())),
        }
    }
}

#[async_trait]
impl Transport for ServerStdioTransport {
    async fn receive(&self) -> Result<Option<Message>> {
        let mut reader = self.reader.lock().await;
        loop {
            let mut line = String::new();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                debug!("stdin closed, shutting down");
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            debug!("Received: {}", line.trim_end());
            let message: Message = serde_json::from_str(&line)?;
            return Ok(Some(message));
        }
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let serialized = serde_json::to_string(message)?;
        debug!("Sending: {serialized}");
        let mut writer = self.writer.lock().await;
        writer.write_all(serialized.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
