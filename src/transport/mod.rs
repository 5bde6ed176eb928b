pub mod error;
mod inmemory_transport;
mod sse_transport;
mod stdio_transport;

pub use error::TransportError;
pub use inmemory_transport::ServerInMemoryTransport;
pub use sse_transport::ServerSseTransport;
pub use stdio_transport::ServerStdioTransport;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A bidirectional message pipe carrying JSON-RPC messages.
///
/// `receive` resolves to `None` when the peer has gone away; the serving
/// loop treats that as a clean shutdown signal.
#[async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    async fn receive(&self) -> Result<Option<Message>>;
    async fn send(&self, message: &Message) -> Result<()>;
    async fn open(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

pub type Message = JsonRpcMessage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcVersion(String);

impl Default for JsonRpcVersion {
    fn default() -> Self {
        JsonRpcVersion("2.0".to_string())
    }
}

// Variant order matters: untagged deserialization tries top to bottom, and a
// request body would also satisfy the notification shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub jsonrpc: JsonRpcVersion,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub jsonrpc: JsonRpcVersion,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub jsonrpc: JsonRpcVersion,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
