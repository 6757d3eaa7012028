//! Broker HTTP server.
//!
//! Serves the human-facing REST surface used by the browser client and the
//! WebSocket endpoint agents connect to.

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::domain::models::{
    ApplicationConfig, BackendKind, Memory, Message, QueryHistoryRecord, ServerConfig, ServerFrame,
};
use crate::services::session_broker::AgentSummary;
use crate::services::{BrokerError, SessionBroker};

const MAX_PAGE: u32 = 500;
const WRITER_FLUSH: Duration = Duration::from_secs(5);

/// Configuration for the broker HTTP server.
#[derive(Debug, Clone)]
pub struct BrokerHttpConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Whether to enable CORS.
    pub enable_cors: bool,
}

impl From<&ServerConfig> for BrokerHttpConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            enable_cors: server.enable_cors,
        }
    }
}

/// Body of `POST /api/message`.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub user_to: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: String,
    pub recipient: String,
    pub message_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub limit: Option<u32>,
}

impl PageParams {
    fn limit_or(&self, default: u32) -> u32 {
        self.limit.unwrap_or(default).clamp(1, MAX_PAGE)
    }
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        let (status, code) = match &err {
            BrokerError::UnknownAgent(_) | BrokerError::UnknownRecipient(_) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            BrokerError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            err if err.is_storage() => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        if status.is_server_error() {
            warn!(error = %err, "broker request failed");
        }
        api_error(status, code, err.to_string())
    }
}

struct AppState {
    broker: Arc<SessionBroker>,
    application: ApplicationConfig,
    backend: BackendKind,
}

/// Broker HTTP server.
pub struct BrokerHttpServer {
    config: BrokerHttpConfig,
    state: Arc<AppState>,
}

impl BrokerHttpServer {
    pub fn new(broker: Arc<SessionBroker>, server: &ServerConfig, backend: BackendKind) -> Self {
        Self {
            config: BrokerHttpConfig::from(server),
            state: Arc::new(AppState {
                broker,
                application: server.application.clone(),
                backend,
            }),
        }
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        let app = Router::new()
            .route("/health", get(health_check))
            .route("/api/user", get(current_user))
            .route("/api/config", get(app_config))
            .route("/api/agents", get(list_agents))
            .route("/api/message", post(send_message))
            .route("/api/messages/{agent}", get(message_history))
            .route("/api/agents/{agent}/memories", get(agent_memories))
            .route("/api/agents/{agent}/query-history", get(agent_query_history))
            .route("/ws/agent/{agent}", get(agent_socket))
            .with_state(Arc::clone(&self.state));

        if self.config.enable_cors {
            app.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
                .layer(TraceLayer::new_for_http())
        } else {
            app.layer(TraceLayer::new_for_http())
        }
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(
        self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        info!(addr = %listener.local_addr()?, "broker listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "backend": state.backend.as_str(),
        "live_sessions": state.broker.live_sessions().await,
    }))
}

async fn current_user(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "username": state.broker.current_user() }))
}

async fn app_config(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "name": state.application.name,
        "display_name": state.application.display_name,
        "description": state.application.description,
        "backend": state.backend.as_str(),
    }))
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AgentSummary>>, ApiError> {
    Ok(Json(state.broker.list_agents().await?))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let Json(req) = body.map_err(|rejection| {
        api_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", rejection.body_text())
    })?;
    if req.message.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "message must not be empty",
        ));
    }
    let recipient = req.user_to.trim();
    let from = state.broker.current_user().to_string();
    let sent = state.broker.send_message(&from, recipient, &req.message).await?;
    Ok(Json(SendMessageResponse {
        success: true,
        message: format!("Message sent to {recipient}"),
        recipient: sent.to,
        message_id: sent.id,
    }))
}

async fn message_history(
    State(state): State<Arc<AppState>>,
    Path(agent): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let user = state.broker.current_user().to_string();
    let messages = state.broker.history(&user, &agent, params.limit_or(50)).await?;
    Ok(Json(messages))
}

async fn agent_memories(
    State(state): State<Arc<AppState>>,
    Path(agent): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<Memory>>, ApiError> {
    Ok(Json(
        state.broker.agent_memories(&agent, params.limit_or(20)).await?,
    ))
}

async fn agent_query_history(
    State(state): State<Arc<AppState>>,
    Path(agent): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<QueryHistoryRecord>>, ApiError> {
    Ok(Json(
        state.broker.agent_query_history(&agent, params.limit_or(20)).await?,
    ))
}

async fn agent_socket(
    ws: WebSocketUpgrade,
    Path(agent): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let broker = Arc::clone(&state.broker);
    ws.on_upgrade(move |socket| handle_agent_socket(socket, broker, agent))
        .into_response()
}

fn encode(frame: &ServerFrame) -> Option<WsMessage> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(WsMessage::Text(text.into())),
        Err(err) => {
            warn!(error = %err, "failed to encode server frame");
            None
        }
    }
}

async fn handle_agent_socket(socket: WebSocket, broker: Arc<SessionBroker>, agent: String) {
    let (mut sender, mut receiver) = socket.split();

    let (mut session, mut frames) = match broker.handshake(&agent).await {
        Ok(pair) => pair,
        Err(err) => {
            let reason = match err {
                BrokerError::UnknownAgent(name) => format!("unknown agent: {name}"),
                other => other.to_string(),
            };
            if let Some(message) = encode(&ServerFrame::Rejected { reason }) {
                let _ = sender.send(message).await;
            }
            let _ = sender.close().await;
            return;
        }
    };

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let terminal = frame.is_terminal();
            if let Some(message) = encode(&frame) {
                if sender.send(message).await.is_err() {
                    break;
                }
            }
            if terminal {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            inbound = receiver.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    if !session.handle_text(text.as_str()).await {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(agent = %agent, error = %err, "agent socket error");
                    break;
                }
            },
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    session.close().await;
    drop(session);
    if !writer_done && tokio::time::timeout(WRITER_FLUSH, writer).await.is_err() {
        debug!(agent = %agent, "writer still busy after session closed");
    }
}
