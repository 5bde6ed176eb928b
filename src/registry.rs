use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::ServerError;
use crate::types::{CallToolRequest, CallToolResponse, Tool, ToolAnnotations};

/// A callback that can execute a tool.
pub trait ToolCallback: Send + Sync {
    fn call(
        &self,
        args: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CallToolResponse>> + Send>>;
}

struct ToolCallbackFn(
    Box<
        dyn Fn(Option<Value>) -> Pin<Box<dyn Future<Output = anyhow::Result<CallToolResponse>> + Send>>
            + Send
            + Sync,
    >,
);

impl ToolCallback for ToolCallbackFn {
    fn call(
        &self,
        args: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CallToolResponse>> + Send>> {
        (self.0)(args)
    }
}

/// A registered tool with metadata and its execution callback.
#[derive(Clone)]
pub struct RegisteredTool {
    pub metadata: Tool,
    pub execute_callback: Arc<dyn ToolCallback>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// The table mapping tool names to handlers and metadata.
///
/// Names are unique and entries are immutable once registered; enumeration
/// preserves registration order so every transport advertises the same
/// stable listing.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    entries: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tool. A duplicate name is rejected and the registry is left
    /// exactly as it was.
    pub fn register(&mut self, tool: RegisteredTool) -> Result<(), ServerError> {
        let name = tool.metadata.name.clone();
        if self.entries.contains_key(&name) {
            return Err(ServerError::DuplicateTool(name));
        }
        self.entries.insert(name.clone(), tool);
        self.order.push(name);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&RegisteredTool, ServerError> {
        self.entries
            .get(name)
            .ok_or_else(|| ServerError::UnknownTool(name.to_string()))
    }

    /// Tool metadata in registration order.
    pub fn list(&self) -> Vec<Tool> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|tool| tool.metadata.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Dispatch an invocation request.
    ///
    /// An unknown name is an `UnknownTool` error for the transport to map to
    /// a protocol-level not-found response. A handler failure is folded into
    /// an `is_error` tool response so a misbehaving tool cannot take down
    /// the serving process.
    pub async fn call_tool(
        &self,
        request: CallToolRequest,
    ) -> Result<CallToolResponse, ServerError> {
        let tool = self.lookup(&request.name)?;
        let args = request
            .arguments
            .map(|arguments| Value::Object(arguments.into_iter().collect()));
        match tool.execute_callback.call(args).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!("tool {} failed: {e:#}", request.name);
                Ok(CallToolResponse::error(format!(
                    "Error calling tool {}: {e}",
                    request.name
                )))
            }
        }
    }
}

/// Builder assembling a tool's metadata and callback into a registrable
/// entry.
pub struct ToolBuilder {
    name: String,
    description: Option<String>,
    input_schema: Option<Value>,
    annotations: Option<ToolAnnotations>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: None,
            annotations: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_schema_ref(&self) -> Option<&Value> {
        self.input_schema.as_ref()
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Build the tool with the given execution callback.
    pub fn build<F, Fut>(self, callback: F) -> (Tool, RegisteredTool)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CallToolResponse>> + Send + 'static,
    {
        let metadata = Tool {
            name: self.name,
            description: self.description,
            input_schema: self
                .input_schema
                .unwrap_or_else(|| serde_json::json!({"type": "object"})),
            annotations: self.annotations,
        };

        let registered = RegisteredTool {
            metadata: metadata.clone(),
            execute_callback: Arc::new(ToolCallbackFn(Box::new(move |args| {
                Box::pin(callback(args))
            }))),
        };

        (metadata, registered)
    }

    /// Build the tool with a serde-typed execution callback. Undecodable
    /// arguments surface as an invocation error, not a panic.
    pub fn build_typed<T, F, Fut>(self, callback: F) -> (Tool, RegisteredTool)
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CallToolResponse>> + Send + 'static,
    {
        let name = self.name.clone();
        self.build(
            move |args| -> Pin<Box<dyn Future<Output = anyhow::Result<CallToolResponse>> + Send>> {
                let args = args.unwrap_or_else(|| serde_json::json!({}));
                match serde_json::from_value::<T>(args) {
                    Ok(args) => Box::pin(callback(args)),
                    Err(e) => {
                        let name = name.clone();
                        Box::pin(async move {
                            Err(anyhow::anyhow!("invalid arguments for tool {name}: {e}"))
                        })
                    }
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn echo_tool(name: &str) -> RegisteredTool {
        let (_, registered) = ToolBuilder::new(name)
            .description("echo")
            .build(|args| async move {
                Ok(CallToolResponse::text(
                    args.unwrap_or(Value::Null).to_string(),
                ))
            });
        registered
    }

    fn text_of(response: &CallToolResponse) -> &str {
        match &response.content[0] {
            crate::types::ToolResponseContent::Text { text } => text,
            other => panic!("expected text content, got {other:?}"),
        }
    }

    #[test]
    fn distinct_registrations_are_retrievable_in_order() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("alpha")).unwrap();
        registry.register(echo_tool("beta")).unwrap();

        assert!(registry.lookup("alpha").is_ok());
        assert!(registry.lookup("beta").is_ok());

        let names: Vec<_> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn duplicate_name_is_rejected_and_first_entry_survives() {
        let mut registry = ToolRegistry::new();
        let (_, first) = ToolBuilder::new("echo")
            .description("first")
            .build(|_| async { Ok(CallToolResponse::text("first")) });
        let (_, second) = ToolBuilder::new("echo")
            .description("second")
            .build(|_| async { Ok(CallToolResponse::text("second")) });

        registry.register(first).unwrap();
        let err = registry.register(second).unwrap_err();
        assert!(matches!(err, ServerError::DuplicateTool(name) if name == "echo"));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.lookup("echo").unwrap().metadata.description.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn lookup_of_unregistered_name_fails() {
        let registry = ToolRegistry::new();
        let err = registry.lookup("missing").unwrap_err();
        assert!(matches!(err, ServerError::UnknownTool(name) if name == "missing"));
    }

    #[test]
    fn list_is_idempotent() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("a")).unwrap();
        registry.register(echo_tool("b")).unwrap();
        assert_eq!(registry.list(), registry.list());
    }

    #[tokio::test]
    async fn call_tool_reports_unknown_names() {
        let registry = ToolRegistry::new();
        let err = registry
            .call_tool(CallToolRequest {
                name: "missing".to_string(),
                arguments: None,
                meta: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn handler_failure_becomes_error_response() {
        let mut registry = ToolRegistry::new();
        let (_, registered) = ToolBuilder::new("broken")
            .build(|_| async { Err(anyhow::anyhow!("boom")) });
        registry.register(registered).unwrap();

        let response = registry
            .call_tool(CallToolRequest {
                name: "broken".to_string(),
                arguments: None,
                meta: None,
            })
            .await
            .unwrap();
        assert_eq!(response.is_error, Some(true));
        assert!(text_of(&response).contains("boom"));
    }

    #[tokio::test]
    async fn typed_builder_decodes_arguments() {
        #[derive(Deserialize)]
        struct AddArgs {
            a: i64,
            b: i64,
        }

        let (_, registered) = ToolBuilder::new("add")
            .input_schema(json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"}
                },
                "required": ["a", "b"]
            }))
            .build_typed(|args: AddArgs| async move {
                Ok(CallToolResponse::text((args.a + args.b).to_string()))
            });

        let response = registered
            .execute_callback
            .call(Some(json!({"a": 2, "b": 3})))
            .await
            .unwrap();
        assert_eq!(text_of(&response), "5");

        let err = registered
            .execute_callback
            .call(Some(json!({"a": "two"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid arguments"));
    }
}
