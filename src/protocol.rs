use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::ServerError;
use crate::transport::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message,
    Transport,
};
use crate::types::ErrorCode;

/// Transport-agnostic JSON-RPC dispatch table.
///
/// This is the handle every transport binds to: it can enumerate tools
/// (`tools/list`), invoke them (`tools/call`), and answer the protocol
/// handshake. The table is immutable once built, so concurrent dispatch
/// needs no locking.
pub struct Dispatcher {
    request_handlers: HashMap<String, Box<dyn RequestHandler>>,
    notification_handlers: HashMap<String, Box<dyn NotificationHandler>>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Dispatch a request. Failures never propagate: every outcome is a
    /// JSON-RPC response carrying either a result or an error payload.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let Some(handler) = self.request_handlers.get(&request.method) else {
            return error_response(
                request.id,
                ErrorCode::MethodNotFound,
                format!("Method not found: {}", request.method),
            );
        };

        let id = request.id;
        match handler.handle(request).await {
            Ok(response) => response,
            Err(e) => error_response(id, error_code_for(&e), e.to_string()),
        }
    }

    pub async fn handle_notification(&self, notification: JsonRpcNotification) -> Result<()> {
        if let Some(handler) = self.notification_handlers.get(&notification.method) {
            handler.handle(notification).await?;
        } else {
            debug!("No handler for notification: {}", notification.method);
        }
        Ok(())
    }

    /// Dispatch any inbound message, producing the reply to send back, if
    /// one is required.
    pub async fn handle_message(&self, message: Message) -> Option<Message> {
        match message {
            JsonRpcMessage::Request(request) => {
                Some(JsonRpcMessage::Response(self.handle_request(request).await))
            }
            JsonRpcMessage::Notification(notification) => {
                if let Err(e) = self.handle_notification(notification).await {
                    error!("Notification handler failed: {e:?}");
                }
                None
            }
            JsonRpcMessage::Response(response) => {
                debug!("Ignoring unsolicited response for id {}", response.id);
                None
            }
        }
    }
}

/// Map a handler failure onto the protocol error space. An unknown tool is
/// a not-found error for the client; undecodable params are the client's
/// fault; everything else is internal.
fn error_code_for(e: &anyhow::Error) -> ErrorCode {
    if let Some(server_error) = e.downcast_ref::<ServerError>() {
        return match server_error {
            ServerError::UnknownTool(_) => ErrorCode::MethodNotFound,
            ServerError::InvalidToolSignature(_) => ErrorCode::InvalidParams,
            _ => ErrorCode::InternalError,
        };
    }
    if e.downcast_ref::<serde_json::Error>().is_some() {
        return ErrorCode::InvalidParams;
    }
    ErrorCode::InternalError
}

fn error_response(id: u64, code: ErrorCode, message: String) -> JsonRpcResponse {
    JsonRpcResponse {
        id,
        result: None,
        error: Some(JsonRpcError {
            code: code as i32,
            message,
            data: None,
        }),
        ..Default::default()
    }
}

#[derive(Default)]
pub struct DispatcherBuilder {
    request_handlers: HashMap<String, Box<dyn RequestHandler>>,
    notification_handlers: HashMap<String, Box<dyn NotificationHandler>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed request handler
    pub fn request_handler<Req, Resp>(
        mut self,
        method: &str,
        handler: impl Fn(Req) -> Pin<Box<dyn Future<Output = Result<Resp>> + Send>>
            + Send
            + Sync
            + 'static,
    ) -> Self
    where
        Req: DeserializeOwned + Send + Sync + 'static,
        Resp: Serialize + Send + Sync + 'static,
    {
        let handler = TypedRequestHandler {
            handler: Box::new(handler),
            _phantom: std::marker::PhantomData,
        };
        self.request_handlers
            .insert(method.to_string(), Box::new(handler));
        self
    }

    pub fn has_request_handler(&self, method: &str) -> bool {
        self.request_handlers.contains_key(method)
    }

    pub fn notification_handler<N>(
        mut self,
        method: &str,
        handler: impl Fn(N) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
            + Send
            + Sync
            + 'static,
    ) -> Self
    where
        N: DeserializeOwned + Send + Sync + 'static,
    {
        self.notification_handlers.insert(
            method.to_string(),
            Box::new(TypedNotificationHandler {
                handler: Box::new(handler),
                _phantom: std::marker::PhantomData,
            }),
        );
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            request_handlers: self.request_handlers,
            notification_handlers: self.notification_handlers,
        }
    }
}

/// Serve loop pairing a dispatcher with a transport. Runs until the
/// transport signals shutdown by yielding `None`.
#[derive(Clone)]
pub struct Protocol<T: Transport> {
    transport: Arc<T>,
    dispatcher: Arc<Dispatcher>,
}

impl<T: Transport> Protocol<T> {
    pub fn new(transport: T, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            transport: Arc::new(transport),
            dispatcher,
        }
    }

    pub async fn listen(&self) -> Result<()> {
        debug!("Listening for requests");
        self.transport.open().await?;
        loop {
            let message = match self.transport.receive().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to parse message: {e:?}");
                    continue;
                }
            };

            if let Some(reply) = self.dispatcher.handle_message(message).await {
                self.transport.send(&reply).await?;
            }
        }
        self.transport.close().await?;
        Ok(())
    }
}

#[async_trait]
trait RequestHandler: Send + Sync {
    async fn handle(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;
}

#[async_trait]
trait NotificationHandler: Send + Sync {
    async fn handle(&self, notification: JsonRpcNotification) -> Result<()>;
}

struct TypedRequestHandler<Req, Resp>
where
    Req: DeserializeOwned + Send + Sync + 'static,
    Resp: Serialize + Send + Sync + 'static,
{
    handler: Box<
        dyn Fn(Req) -> Pin<Box<dyn Future<Output = Result<Resp>> + Send>> + Send + Sync + 'static,
    >,
    _phantom: std::marker::PhantomData<(Req, Resp)>,
}

#[async_trait]
impl<Req, Resp> RequestHandler for TypedRequestHandler<Req, Resp>
where
    Req: DeserializeOwned + Send + Sync + 'static,
    Resp: Serialize + Send + Sync + 'static,
{
    async fn handle(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let params: Req = match request.params {
            None | Some(serde_json::Value::Null) => {
                serde_json::from_value(serde_json::Value::Null)?
            }
            Some(params) => serde_json::from_value(params)?,
        };
        let result = (self.handler)(params).await?;
        Ok(JsonRpcResponse {
            id: request.id,
            result: Some(serde_json::to_value(result)?),
            error: None,
            ..Default::default()
        })
    }
}

struct TypedNotificationHandler<N>
where
    N: DeserializeOwned + Send + Sync + 'static,
{
    handler:
        Box<dyn Fn(N) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync + 'static>,
    _phantom: std::marker::PhantomData<N>,
}

#[async_trait]
impl<N> NotificationHandler for TypedNotificationHandler<N>
where
    N: DeserializeOwned + Send + Sync + 'static,
{
    async fn handle(&self, notification: JsonRpcNotification) -> Result<()> {
        let params: N = match notification.params {
            None | Some(serde_json::Value::Null) => {
                serde_json::from_value(serde_json::Value::Null)?
            }
            Some(params) => serde_json::from_value(params)?,
        };
        (self.handler)(params).await
    }
}
