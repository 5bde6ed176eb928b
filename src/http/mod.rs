mod middleware;
mod sse_app;
mod streamable_app;

pub use middleware::{AuthConfig, Claims, JwtAuth};
pub use sse_app::SseApp;
pub use streamable_app::StreamableHttpApp;

use actix_web::middleware::DefaultHeaders;

use crate::protocol::Dispatcher;
use crate::transport::{JsonRpcRequest, JsonRpcVersion};
use crate::types::ToolsListResponse;

/// Response headers the deployment scripts expect on every HTTP transport.
pub(crate) fn security_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add((
            "Content-Security-Policy",
            "default-src 'self'; connect-src *",
        ))
        .add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains",
        ))
}

/// Ask a binding's dispatcher which tools it advertises.
pub(crate) async fn advertised_tool_names(dispatcher: &Dispatcher) -> Vec<String> {
    let response = dispatcher
        .handle_request(JsonRpcRequest {
            id: 0,
            method: "tools/list".to_string(),
            params: None,
            jsonrpc: JsonRpcVersion::default(),
        })
        .await;
    response
        .result
        .and_then(|result| serde_json::from_value::<ToolsListResponse>(result).ok())
        .map(|listing| listing.tools.into_iter().map(|tool| tool.name).collect())
        .unwrap_or_default()
}
