//! HTTP chat gateway for Parley.
//!
//! Serves the embedded chat page and a small form-based API:
//!
//! - `GET /`: the chat page
//! - `GET /history`: the stored transcript as JSON
//! - `POST /get`: form field `msg`, answers `{"response": ...}`
//! - `GET /health`: liveness probe
//!
//! Built on Axum. Every message goes through one shared
//! [`Orchestrator`], which serializes turns against the transcript.

pub mod frontend;

use axum::extract::DefaultBodyLimit;
use axum::extract::rejection::FormRejection;
use axum::{
    Form, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use parley_config::AppConfig;
use parley_core::engine::GenerationEngine;
use parley_core::error::{Error, GenerationError};
use parley_core::store::TranscriptStore;
use parley_core::turn::Transcript;
use parley_pipeline::Orchestrator;
use parley_store::JsonFileStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/history", get(history_handler))
        .route("/get", post(chat_handler))
        .with_state(state)
        .merge(frontend::frontend_router())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
///
/// Builds the engine and the JSON-file store from `config` once and shares
/// them for the life of the server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let engine = parley_engine::build_engine(&config.engine)?;
    match engine.health_check().await {
        Ok(true) => {}
        Ok(false) => warn!(engine = engine.name(), "Engine reports unhealthy, requests may fail"),
        Err(e) => warn!(engine = engine.name(), error = %e, "Engine unreachable, requests will fail until it is up"),
    }
    let store: Arc<dyn TranscriptStore> = Arc::new(JsonFileStore::new(&config.history.path));
    let orchestrator = Arc::new(Orchestrator::from_config(&config, engine, store));

    info!(
        engine = orchestrator.engine_name(),
        history = %config.history.path.display(),
        strict_persistence = config.persistence.strict,
        "Chat pipeline ready"
    );

    let app = build_router(Arc::new(GatewayState { orchestrator }));

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Errors ---

/// An error rendered as `{"error": ...}` with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::EmptyMessage | Error::EmptyTurn => StatusCode::BAD_REQUEST,
            Error::Generation(GenerationError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Error::Generation(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn history_handler(State(state): State<SharedState>) -> Json<Transcript> {
    Json(state.orchestrator.history().await)
}

#[derive(Deserialize)]
struct ChatForm {
    #[serde(default)]
    msg: String,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

async fn chat_handler(
    State(state): State<SharedState>,
    form: Result<Form<ChatForm>, FormRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Form(form) = form.inspect_err(|e| warn!(error = %e, "Rejected chat request"))?;
    info!(message_len = form.msg.len(), "Chat message received");

    match state.orchestrator.handle_message(&form.msg).await {
        Ok(reply) => {
            let warning = (!reply.persisted)
                .then(|| "The reply could not be saved to the chat history.".to_string());
            if warning.is_some() {
                warn!("Returning reply that was not persisted");
            }
            Ok(Json(ChatResponse {
                response: reply.response,
                warning,
            }))
        }
        Err(e) => {
            error!(error = %e, "Chat message failed");
            Err(e.into())
        }
    }
}
