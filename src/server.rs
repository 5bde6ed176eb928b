use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ServerError;
use crate::http::{SseApp, StreamableHttpApp};
use crate::protocol::{Dispatcher, Protocol};
use crate::registry::{RegisteredTool, ToolBuilder, ToolRegistry};
use crate::transport::ServerStdioTransport;
use crate::types::{
    CallToolRequest, CallToolResponse, Implementation, InitializeRequest, InitializeResponse,
    ListRequest, ServerCapabilities, Tool, ToolAnnotations, ToolsListResponse,
    LATEST_PROTOCOL_VERSION,
};

/// Bind address and endpoint paths for the HTTP transports.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub sse_path: String,
    pub message_path: String,
    pub streamable_http_path: String,
    /// When set, HTTP transports require Bearer JWTs signed with this secret.
    pub jwt_secret: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            sse_path: "/sse".to_string(),
            message_path: "/message".to_string(),
            streamable_http_path: "/mcp".to_string(),
            jwt_secret: None,
        }
    }
}

/// An MCP server: a named tool registry plus transport bindings.
///
/// Tools are registered during setup via [`McpServer::tool`]; a transport
/// binding (`sse_app`, `streamable_http_app`, `run`) then serves the
/// registry to the outside world. Each binding operates on a snapshot taken
/// when it is built: tools registered afterwards become visible only through
/// a binding built later.
pub struct McpServer {
    server_info: Implementation,
    settings: Settings,
    registry: Arc<RwLock<ToolRegistry>>,
}

impl McpServer {
    /// `name` identifies the server to clients during the handshake and is
    /// expected to be non-empty.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug_assert!(!name.trim().is_empty(), "server name must be non-empty");
        Self {
            server_info: Implementation {
                name,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            settings: Settings::default(),
            registry: Arc::new(RwLock::new(ToolRegistry::new())),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn name(&self) -> &str {
        &self.server_info.name
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Start registering a tool under `name`. Configure metadata on the
    /// returned registration, then apply it to the handler with
    /// [`ToolRegistration::register`] or [`ToolRegistration::register_typed`].
    pub fn tool(&self, name: impl Into<String>) -> ToolRegistration<'_> {
        ToolRegistration {
            server: self,
            builder: ToolBuilder::new(name),
        }
    }

    /// Tool metadata in registration order.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.registry_read().list()
    }

    fn registry_read(&self) -> RwLockReadGuard<'_, ToolRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, registered: RegisteredTool) -> Result<(), ServerError> {
        let name = registered.metadata.name.clone();
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(registered)?;
        debug!("registered tool {name}");
        Ok(())
    }

    /// Frozen copy of the registry as it stands right now.
    fn snapshot(&self) -> Arc<ToolRegistry> {
        Arc::new(self.registry_read().clone())
    }

    /// Build the JSON-RPC dispatch table over a snapshot of the registry.
    ///
    /// This is the transport-agnostic handle every binding serves from: it
    /// answers the handshake, advertises the tool listing, and invokes
    /// tools.
    pub fn dispatcher(&self) -> Dispatcher {
        let tools = self.snapshot();
        let server_info = self.server_info.clone();

        let list_tools = tools.clone();
        let call_tools = tools;

        Dispatcher::builder()
            .request_handler("initialize", move |request: InitializeRequest| {
                let server_info = server_info.clone();
                Box::pin(async move {
                    debug!(
                        client = %request.client_info.name,
                        version = %request.protocol_version,
                        "initialize"
                    );
                    Ok(InitializeResponse {
                        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                        capabilities: ServerCapabilities {
                            tools: Some(serde_json::json!({})),
                            ..Default::default()
                        },
                        server_info,
                    })
                })
            })
            .notification_handler("notifications/initialized", |_: Option<Value>| {
                Box::pin(async {
                    debug!("client initialized");
                    Ok(())
                })
            })
            .request_handler("ping", |_: Option<Value>| {
                Box::pin(async { Ok(serde_json::json!({})) })
            })
            .request_handler("tools/list", move |_request: Option<ListRequest>| {
                let tools = list_tools.clone();
                Box::pin(async move {
                    Ok(ToolsListResponse {
                        tools: tools.list(),
                        next_cursor: None,
                        meta: None,
                    })
                })
            })
            .request_handler("tools/call", move |request: CallToolRequest| {
                let tools = call_tools.clone();
                Box::pin(async move { tools.call_tool(request).await.map_err(Into::into) })
            })
            .build()
    }

    /// Build the event-stream binding. The handle reflects the registry at
    /// call time and is suitable for embedding into a host actix-web
    /// application.
    pub fn sse_app(&self) -> SseApp {
        SseApp::new(Arc::new(self.dispatcher()), &self.settings)
    }

    /// Build the streamable-HTTP binding. Same snapshot semantics as
    /// [`McpServer::sse_app`].
    pub fn streamable_http_app(&self) -> StreamableHttpApp {
        StreamableHttpApp::new(Arc::new(self.dispatcher()), &self.settings)
    }

    /// Serve the named transport until shutdown.
    ///
    /// Recognized names are `"stdio"`, `"sse"` and `"streamable-http"`;
    /// anything else fails before a socket or stdin is touched. The call
    /// returns on clean shutdown (EOF on stdio, server stop on HTTP) and
    /// propagates fatal transport errors.
    pub async fn run(&self, transport: &str) -> Result<(), ServerError> {
        match transport {
            "stdio" => {
                info!("serving {} on stdio", self.server_info.name);
                let protocol =
                    Protocol::new(ServerStdioTransport::default(), Arc::new(self.dispatcher()));
                protocol.listen().await.map_err(ServerError::Other)
            }
            "sse" => {
                let app = self.sse_app();
                info!(
                    "serving {} (sse) on http://{}:{}",
                    self.server_info.name, self.settings.host, self.settings.port
                );
                app.serve(&self.settings.host, self.settings.port)
                    .await
                    .map_err(ServerError::Io)
            }
            "streamable-http" => {
                let app = self.streamable_http_app();
                info!(
                    "serving {} (streamable-http) on http://{}:{}",
                    self.server_info.name, self.settings.host, self.settings.port
                );
                app.serve(&self.settings.host, self.settings.port)
                    .await
                    .map_err(ServerError::Io)
            }
            other => Err(ServerError::UnsupportedTransport(other.to_string())),
        }
    }
}

/// Two-stage tool registration: carries the configuration, then applies it
/// to an async handler. Registering hands the exact handler back so the
/// caller can keep using it directly; the registry works with its own
/// clone.
pub struct ToolRegistration<'a> {
    server: &'a McpServer,
    builder: ToolBuilder,
}

impl ToolRegistration<'_> {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.builder = self.builder.description(description);
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.builder = self.builder.input_schema(schema);
        self
    }

    pub fn annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.builder = self.builder.annotations(annotations);
        self
    }

    fn validate(&self) -> Result<(), ServerError> {
        let name = self.builder.name();
        if name.trim().is_empty() {
            return Err(ServerError::InvalidToolSignature(
                "tool name must be non-empty".to_string(),
            ));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(ServerError::InvalidToolSignature(format!(
                "tool name {name:?} must not contain whitespace"
            )));
        }
        if let Some(schema) = self.builder.input_schema_ref() {
            if !schema.is_object() {
                return Err(ServerError::InvalidToolSignature(format!(
                    "input schema for {name} must be a JSON object"
                )));
            }
        }
        Ok(())
    }

    /// Register an untyped handler taking the raw JSON arguments.
    pub fn register<F, Fut>(self, handler: F) -> Result<F, ServerError>
    where
        F: Fn(Option<Value>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CallToolResponse>> + Send + 'static,
    {
        self.validate()?;
        let (_, registered) = self.builder.build(handler.clone());
        self.server.register(registered)?;
        Ok(handler)
    }

    /// Register a handler taking serde-decoded arguments.
    pub fn register_typed<T, F, Fut>(self, handler: F) -> Result<F, ServerError>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CallToolResponse>> + Send + 'static,
    {
        self.validate()?;
        let (_, registered) = self.builder.build_typed(handler.clone());
        self.server.register(registered)?;
        Ok(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Deserialize)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    fn add_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "number"},
                "b": {"type": "number"}
            },
            "required": ["a", "b"]
        })
    }

    #[tokio::test]
    async fn registration_returns_the_callable_unchanged() {
        let server = McpServer::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let handler = server
            .tool("add")
            .input_schema(add_schema())
            .register_typed(move |args: AddArgs| {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(CallToolResponse::text((args.a + args.b).to_string()))
                }
            })
            .unwrap();

        // Direct calls go through exactly as before registration.
        let response = handler(AddArgs { a: 2, b: 3 }).await.unwrap();
        assert_eq!(response, CallToolResponse::text("5"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(server.list_tools().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_registration_fails_and_keeps_the_first() {
        let server = McpServer::new("test");
        server
            .tool("echo")
            .description("first")
            .register(|_| async { Ok(CallToolResponse::text("first")) })
            .unwrap();

        let err = server
            .tool("echo")
            .description("second")
            .register(|_| async { Ok(CallToolResponse::text("second")) })
            .err()
            .expect("duplicate registration must fail");
        assert!(matches!(err, ServerError::DuplicateTool(name) if name == "echo"));

        let tools = server.list_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description.as_deref(), Some("first"));
    }

    #[test]
    fn invalid_names_and_schemas_fail_fast() {
        let server = McpServer::new("test");

        let err = server
            .tool("")
            .register(|_| async { Ok(CallToolResponse::text("")) })
            .err()
            .expect("empty name must fail");
        assert!(matches!(err, ServerError::InvalidToolSignature(_)));

        let err = server
            .tool("has space")
            .register(|_| async { Ok(CallToolResponse::text("")) })
            .err()
            .expect("whitespace in name must fail");
        assert!(matches!(err, ServerError::InvalidToolSignature(_)));

        let err = server
            .tool("bad_schema")
            .input_schema(json!("not an object"))
            .register(|_| async { Ok(CallToolResponse::text("")) })
            .err()
            .expect("non-object schema must fail");
        assert!(matches!(err, ServerError::InvalidToolSignature(_)));

        assert!(server.list_tools().is_empty());
    }

    #[test]
    fn list_tools_preserves_registration_order() {
        let server = McpServer::new("test");
        for name in ["one", "two", "three"] {
            server
                .tool(name)
                .register(|_| async { Ok(CallToolResponse::text("")) })
                .unwrap();
        }
        let names: Vec<_> = server.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
        assert_eq!(server.list_tools(), server.list_tools());
    }

    #[tokio::test]
    async fn run_rejects_unknown_transport_before_serving() {
        let server = McpServer::new("test");
        let err = server.run("bogus-transport").await.unwrap_err();
        assert!(
            matches!(err, ServerError::UnsupportedTransport(name) if name == "bogus-transport")
        );
    }

    #[tokio::test]
    async fn bindings_snapshot_the_registry_at_build_time() {
        let server = McpServer::new("test");
        server
            .tool("early")
            .register(|_| async { Ok(CallToolResponse::text("")) })
            .unwrap();

        let app = server.streamable_http_app();

        server
            .tool("late")
            .register(|_| async { Ok(CallToolResponse::text("")) })
            .unwrap();

        // The handle built before the second registration still serves the
        // old listing; a fresh handle sees both.
        assert_eq!(app.tool_names().await, vec!["early"]);
        assert_eq!(
            server.streamable_http_app().tool_names().await,
            vec!["early", "late"]
        );
    }
}
