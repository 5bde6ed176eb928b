use thiserror::Error;

/// Failures raised inside a transport, wrapped into `anyhow::Error` at the
/// `Transport` trait boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("failed to deliver message: {0}")]
    SendFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
