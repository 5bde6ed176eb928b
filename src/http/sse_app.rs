use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::web::{self, Query};
use actix_web::{App, HttpRequest, HttpResponse, HttpServer};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{security_headers, AuthConfig, JwtAuth};
use crate::protocol::{Dispatcher, Protocol};
use crate::server::Settings;
use crate::transport::{Message, ServerSseTransport};

const SSE_CHANNEL_CAPACITY: usize = 100;

type SessionMap = Arc<Mutex<HashMap<String, ServerSseTransport>>>;

#[derive(Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Event-stream binding over a registry snapshot.
///
/// `GET {sse_path}` opens a session and streams responses; `POST
/// {message_path}?sessionId=...` feeds a session's inbox. The handle can be
/// embedded into a host application via [`SseApp::configure`] or served
/// standalone via [`SseApp::serve`]. Tools registered after the handle was
/// built are not visible through it; build a fresh handle to pick them up.
#[derive(Clone)]
pub struct SseApp {
    dispatcher: Arc<Dispatcher>,
    sessions: SessionMap,
    sse_path: String,
    message_path: String,
    jwt_secret: Option<String>,
}

impl SseApp {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, settings: &Settings) -> Self {
        Self {
            dispatcher,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            sse_path: settings.sse_path.clone(),
            message_path: settings.message_path.clone(),
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
            let sse_path = app.sse_path.clone();
            let message_path = app.message_path.clone();
            cfg.app_data(web::Data::new(app))
                .route(&sse_path, web::get().to(sse_handler))
                .route(&message_path, web::post().to(message_handler));
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

/// Removes the session and cancels its dispatch task when the client's
/// event stream goes away.
struct SessionGuard {
    session_id: String,
    sessions: SessionMap,
    task: JoinHandle<()>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&self.session_id);
        }
        self.task.abort();
        debug!("SSE session {} closed", self.session_id);
    }
}

async fn sse_handler(req: HttpRequest, app: web::Data<SseApp>) -> HttpResponse {
    let client_ip = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    info!("New SSE connection request from {client_ip}");

    let session_id = Uuid::new_v4().to_string();
    let (sse_tx, sse_rx) = broadcast::channel(SSE_CHANNEL_CAPACITY);
    let transport = ServerSseTransport::new(sse_tx);

    app.sessions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(session_id.clone(), transport.clone());

    let protocol = Protocol::new(transport, app.dispatcher.clone());
    let task = tokio::spawn(async move {
        if let Err(e) = protocol.listen().await {
            error!("SSE session error: {e:?}");
        }
    });

    info!("SSE connection established for {client_ip} with session_id {session_id}");

    let endpoint_info = format!(
        "event: endpoint\ndata: {}?sessionId={}\n\n",
        app.message_path, session_id
    );
    let guard = SessionGuard {
        session_id: session_id.clone(),
        sessions: app.sessions.clone(),
        task,
    };

    let stream = futures::stream::once(async move {
        Ok::<_, Infallible>(web::Bytes::from(endpoint_info))
    })
    .chain(futures::stream::unfold(
        (sse_rx, guard),
        |(mut rx, guard)| async move {
            match rx.recv().await {
                Ok(message) => {
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("Failed to encode SSE message: {e}");
                            return None;
                        }
                    };
                    debug!("Sending SSE message: {json}");
                    let bytes = web::Bytes::from(format!("event: message\ndata: {json}\n\n"));
                    Some((Ok::<_, Infallible>(bytes), (rx, guard)))
                }
                Err(_) => None,
            }
        },
    ));

    HttpResponse::Ok()
        .append_header(("X-Session-Id", session_id))
        .content_type("text/event-stream")
        .streaming(stream.boxed_local())
}

async fn message_handler(
    query: Query<MessageQuery>,
    message: web::Json<Message>,
    app: web::Data<SseApp>,
) -> HttpResponse {
    let Some(session_id) = &query.session_id else {
        return HttpResponse::BadRequest().body("Session ID not specified");
    };

    let transport = app
        .sessions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(session_id)
        .cloned();

    match transport {
        Some(transport) => match transport.send_message(message.into_inner()).await {
            Ok(()) => {
                debug!("Queued message for session {session_id}");
                HttpResponse::Accepted().finish()
            }
            Err(e) => {
                error!("Failed to queue message for session {session_id}: {e:?}");
                HttpResponse::InternalServerError().finish()
            }
        },
        None => HttpResponse::NotFound().body(format!("Session {session_id} not found")),
    }
}
