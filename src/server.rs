//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Embed and insert the configured document set |
//! | `POST` | `/agents/{agent}/{name}` | Send a message; reply streams as SSE |
//! | `GET`  | `/agents/{agent}/{name}/get-messages` | Stored conversation history |
//! | `DELETE` | `/agents/{agent}/{name}/messages` | Clear conversation history |
//! | `GET`  | `/diagnostics/ai` | Run a trivial prompt, return the raw model result |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Anything else, including unknown agents and known paths with the wrong
//! method, is `404 Not found`.
//!
//! # Chat stream framing
//!
//! ```text
//! data: {"response":"Llama"}
//!
//! data: {"response":" 3.3"}
//!
//! data: [DONE]
//! ```
//!
//! A failure after streaming has started is sent as `event: error` with
//! `data: {"error":"..."}`. A failure before it starts is a plain JSON
//! error response and no stream is opened.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{ChatError, RoutingError};
use crate::ingest::ingest;
use crate::llm::{ChatStream, StreamEvent};
use crate::models::{ChatMessage, Role};
use crate::router;
use crate::services::Services;
use crate::session::{InMemoryConversations, SessionHost};

/// Prompt sent by `GET /diagnostics/ai`.
pub const DIAGNOSTIC_PROMPT: &str = "What is 2+2?";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    services: Services,
    sessions: Arc<SessionHost>,
}

/// Starts the HTTP server on `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config)?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;

    tracing::info!(
        bind = %config.server.bind,
        chat_model = %config.models.chat,
        vector_store = %config.vector_store.provider,
        "server listening"
    );
    println!("ragbot listening on http://{}", config.server.bind);

    serve(listener, services).await
}

/// Serve on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, services: Services) -> anyhow::Result<()> {
    axum::serve(listener, app(services)).await?;
    Ok(())
}

/// Build the router with an in-memory conversation store.
pub fn app(services: Services) -> Router {
    let sessions = SessionHost::new(
        Arc::new(InMemoryConversations::new()),
        Arc::new(services.agent()),
    );
    app_with_sessions(services, Arc::new(sessions))
}

/// Build the router around an existing session host.
pub fn app_with_sessions(services: Services, sessions: Arc<SessionHost>) -> Router {
    let state = AppState { services, sessions };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/agents/{agent}/{name}", post(handle_chat))
        .route("/agents/{agent}/{name}/get-messages", get(handle_get_messages))
        .route("/agents/{agent}/{name}/messages", delete(handle_clear_messages))
        .route("/diagnostics/ai", get(handle_diagnostics))
        .route("/health", get(handle_health))
        .fallback(handle_not_found)
        .method_not_allowed_fallback(handle_not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============ Error responses ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        let (status, code) = match &err {
            ChatError::Generation(_) | ChatError::Stream(_) => {
                (StatusCode::BAD_GATEWAY, "generation_failed")
            }
            ChatError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
            ChatError::History(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

/// Plain-text 404 used for every unmatched route.
fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

async fn handle_not_found() -> Response {
    not_found()
}

/// Failure payload shared by `/ingest` and `/diagnostics/ai`.
fn failure_json(error: String, trace: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": error, "trace": trace })),
    )
        .into_response()
}

// ============ POST /ingest ============

async fn handle_ingest(State(state): State<AppState>) -> Response {
    let services = &state.services;
    match ingest(
        &services.documents,
        services.embedder.as_ref(),
        services.store.as_ref(),
    )
    .await
    {
        Ok(report) => Json(json!({
            "success": true,
            "count": report.count,
            "message": report.message(),
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "ingestion failed");
            failure_json(e.to_string(), format!("{:?}", e))
        }
    }
}

// ============ POST /agents/{agent}/{name} ============

/// Body of a chat request. `content` may be a string or a parts array.
#[derive(Deserialize)]
struct SendMessage {
    #[serde(default = "default_role")]
    role: Role,
    #[serde(deserialize_with = "crate::models::deserialize_content")]
    content: String,
}

fn default_role() -> Role {
    Role::User
}

fn sse_event(item: Result<StreamEvent, ChatError>) -> Event {
    match item {
        Ok(StreamEvent::Delta(text)) => Event::default().data(json!({ "response": text }).to_string()),
        Ok(StreamEvent::Done) => Event::default().data("[DONE]"),
        Err(e) => Event::default()
            .event("error")
            .data(json!({ "error": e.to_string() }).to_string()),
    }
}

async fn handle_chat(
    State(state): State<AppState>,
    Path((agent, name)): Path<(String, String)>,
    body: Result<Json<SendMessage>, JsonRejection>,
) -> Response {
    let key = match router::resolve(&agent, &name) {
        Ok(key) => key,
        Err(e) => return routing_miss(e),
    };

    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()).into_response(),
    };
    if body.role != Role::User {
        return bad_request("only user messages can be sent").into_response();
    }

    let cancel = CancellationToken::new();
    let stream = match state
        .sessions
        .send(&key, ChatMessage::user(body.content), cancel.clone())
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(session = %key, error = %e, "chat turn failed");
            return AppError::from(e).into_response();
        }
    };

    let events = CancelOnDrop {
        inner: stream,
        _guard: cancel.drop_guard(),
    }
    .map(|item| Ok::<_, Infallible>(sse_event(item)));

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Reply stream that cancels its turn when dropped, which is what happens to
/// the response body when the client goes away.
struct CancelOnDrop {
    inner: ChatStream,
    _guard: DropGuard,
}

impl Stream for CancelOnDrop {
    type Item = Result<StreamEvent, ChatError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

fn routing_miss(err: RoutingError) -> Response {
    tracing::debug!(error = %err, "no session for request");
    not_found()
}

// ============ Session history ============

async fn handle_get_messages(
    State(state): State<AppState>,
    Path((agent, name)): Path<(String, String)>,
) -> Response {
    let key = match router::resolve(&agent, &name) {
        Ok(key) => key,
        Err(e) => return routing_miss(e),
    };
    match state.sessions.history(&key).await {
        Ok(history) => Json(history).into_response(),
        Err(e) => internal(e.to_string()).into_response(),
    }
}

async fn handle_clear_messages(
    State(state): State<AppState>,
    Path((agent, name)): Path<(String, String)>,
) -> Response {
    let key = match router::resolve(&agent, &name) {
        Ok(key) => key,
        Err(e) => return routing_miss(e),
    };
    match state.sessions.clear(&key).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => internal(e.to_string()).into_response(),
    }
}

// ============ GET /diagnostics/ai ============

/// Calls the diagnostic model with a fixed prompt and returns its raw result.
async fn handle_diagnostics(State(state): State<AppState>) -> Response {
    match state.services.diagnostic.prompt(DIAGNOSTIC_PROMPT).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "diagnostic prompt failed");
            failure_json(e.to_string(), format!("{:?}", e))
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
