use std::convert::Infallible;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpResponse, HttpServer};
use tracing::{debug, error};

use super::{security_headers, AuthConfig, JwtAuth};
use crate::protocol::Dispatcher;
use crate::server::Settings;
use crate::transport::{JsonRpcMessage, Message};

/// Streamable-HTTP binding over a registry snapshot.
///
/// A single endpoint accepts JSON-RPC messages by POST. Requests are
/// answered with a short event stream carrying exactly one `message` event;
/// notifications are acknowledged with `202 Accepted`. There is no
/// server-initiated stream, so `GET` answers `405`. Snapshot semantics
/// match [`super::SseApp`]: later registrations need a fresh handle.
#[derive(Clone)]
pub struct StreamableHttpApp {
    dispatcher: Arc<Dispatcher>,
    path: String,
    jwt_secret: Option<String>,
}

impl StreamableHttpApp {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, settings: &Settings) -> Self {
        Self {
            dispatcher,
            path: settings.streamable_http_path.clone(),
            jwt_secret: settings.jwt_secret.clone(),
        }
    }

    /// Names of the tools this handle advertises.
    pub async fn tool_names(&self) -> Vec<String> {
        super::advertised_tool_names(&self.dispatcher).await
    }

    /// Mount the binding's routes into a host application.
    pub fn configure(&self) -> impl FnOnce(&mut web::ServiceConfig) {
        let app = self.clone();
        move |cfg| {
            let path = app.path.clone();
            cfg.app_data(web::Data::new(app))
                .route(&path, web::post().to(post_handler))
                .route(&path, web::get().to(get_handler));
        }
    }

    /// Serve the binding until the server is stopped.
    pub async fn serve(self, host: &str, port: u16) -> std::io::Result<()> {
        let auth = self
            .jwt_secret
            .clone()
            .map(|jwt_secret| AuthConfig { jwt_secret });
        HttpServer::new(move || {
            App::new()
                .wrap(Logger::default())
                .wrap(JwtAuth::new(auth.clone()))
                .wrap(Cors::permissive())
                .wrap(security_headers())
                .configure(self.configure())
        })
        .bind((host, port))?
        .run()
        .await
    }
}

async fn post_handler(
    message: web::Json<Message>,
    app: web::Data<StreamableHttpApp>,
) -> HttpResponse {
    match message.into_inner() {
        JsonRpcMessage::Request(request) => {
            debug!("Streamable HTTP request: {}", request.method);
            let response = app.dispatcher.handle_request(request).await;
            let json = match serde_json::to_string(&JsonRpcMessage::Response(response)) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode response: {e}");
                    return HttpResponse::InternalServerError().finish();
                }
            };
            let event = web::Bytes::from(format!("event: message\ndata: {json}\n\n"));
            HttpResponse::Ok()
                .content_type("text/event-stream")
                .streaming(futures::stream::once(async move {
                    Ok::<_, Infallible>(event)
                }))
        }
        JsonRpcMessage::Notification(notification) => {
            if let Err(e) = app.dispatcher.handle_notification(notification).await {
                debug!("Notification handler failed: {e:?}");
            }
            HttpResponse::Accepted().finish()
        }
        JsonRpcMessage::Response(response) => {
            debug!("Ignoring client response for id {}", response.id);
            HttpResponse::Accepted().finish()
        }
    }
}

async fn get_handler() -> HttpResponse {
    HttpResponse::MethodNotAllowed().body("server-initiated streams are not supported")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::McpServer;
    use crate::transport::JsonRpcResponse;
    use crate::types::{
        CallToolResponse, ErrorCode, InitializeResponse, ToolResponseContent,
    };
    use actix_web::test;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    fn calculator() -> McpServer {
        let server = McpServer::new("calculator");
        server
            .tool("add")
            .description("Add two numbers")
            .input_schema(json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"}
                },
                "required": ["a", "b"]
            }))
            .register_typed(|args: AddArgs| async move {
                Ok(CallToolResponse::text((args.a + args.b).to_string()))
            })
            .unwrap();
        server
    }

    fn decode_event(body: &str) -> JsonRpcResponse {
        let data = body
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .expect("no data line in SSE event");
        serde_json::from_str(data).unwrap()
    }

    macro_rules! post {
        ($srv:expr, $payload:expr) => {{
            let req = test::TestRequest::post()
                .uri("/mcp")
                .set_json($payload)
                .to_request();
            let resp = test::call_service($srv, req).await;
            assert!(resp.status().is_success());
            assert_eq!(
                resp.headers().get("content-type").unwrap(),
                "text/event-stream"
            );
            let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
            decode_event(&body)
        }};
    }

    #[actix_web::test]
    async fn initialize_and_list_and_call() {
        let app = calculator().streamable_http_app();
        let srv = test::init_service(App::new().configure(app.configure())).await;

        let response = post!(
            &srv,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2025-03-26",
                    "capabilities": {},
                    "clientInfo": {"name": "test-client", "version": "0.0.1"}
                }
            })
        );
        let init: InitializeResponse = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(init.server_info.name, "calculator");
        assert!(init.capabilities.tools.is_some());

        let response = post!(
            &srv,
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})
        );
        let listing = response.result.unwrap();
        assert_eq!(listing["tools"][0]["name"], "add");

        let response = post!(
            &srv,
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": {"name": "add", "arguments": {"a": 2, "b": 3}}
            })
        );
        let result: CallToolResponse = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(
            result.content[0],
            ToolResponseContent::Text {
                text: "5".to_string()
            }
        );
    }

    #[actix_web::test]
    async fn unknown_tool_is_a_protocol_error_not_a_crash() {
        let app = calculator().streamable_http_app();
        let srv = test::init_service(App::new().configure(app.configure())).await;

        let response = post!(
            &srv,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": "sub", "arguments": {"a": 2, "b": 3}}
            })
        );
        let error = response.error.expect("expected error");
        assert_eq!(error.code, ErrorCode::MethodNotFound as i32);
        assert!(error.message.contains("sub"));

        // The service keeps answering after the failed call.
        let response = post!(
            &srv,
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": {"name": "add", "arguments": {"a": 4, "b": 6}}
            })
        );
        let result: CallToolResponse = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(
            result.content[0],
            ToolResponseContent::Text {
                text: "10".to_string()
            }
        );
    }

    #[actix_web::test]
    async fn notifications_are_accepted_without_a_body() {
        let app = calculator().streamable_http_app();
        let srv = test::init_service(App::new().configure(app.configure())).await;

        let req = test::TestRequest::post()
            .uri("/mcp")
            .set_json(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .to_request();
        let resp = test::call_service(&srv, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::ACCEPTED);
    }

    #[actix_web::test]
    async fn get_is_not_allowed() {
        let app = calculator().streamable_http_app();
        let srv = test::init_service(App::new().configure(app.configure())).await;

        let resp =
            test::call_service(&srv, test::TestRequest::get().uri("/mcp").to_request()).await;
        assert_eq!(
            resp.status(),
            actix_web::http::StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
