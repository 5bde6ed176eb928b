use thiserror::Error;

/// Errors surfaced by registration and transport binding.
///
/// Registration-time variants are raised synchronously to setup code and
/// never leave the registry half-mutated. Errors raised by a tool handler
/// while serving are not represented here; the dispatch layer folds them
/// into protocol-level error payloads.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid tool signature: {0}")]
    InvalidToolSignature(String),

    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
