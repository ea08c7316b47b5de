//! HTTP trigger surface.
//!
//! Exposes the batch runner behind a token check: `POST /sync/run` takes a
//! JSON body with the token and per-run options, `GET /health` answers
//! unauthenticated. Responses use a `{success, data}` / `{success, error}`
//! envelope.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Result, SyncError};
use crate::orchestrator::{BatchOptions, Orchestrator};

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

/// Trigger request body.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub token: Option<String>,
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub reset: bool,
}

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Build the trigger router.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sync/run", post(run_sync))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { orchestrator })
}

/// Bind and serve the trigger endpoints until the process stops.
pub async fn serve(orchestrator: Arc<Orchestrator>, host: &str, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "trigger server listening");
    axum::serve(listener, router(orchestrator)).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn run_sync(State(state): State<AppState>, Json(request): Json<RunRequest>) -> Response {
    let options = BatchOptions {
        batch_size: request.batch_size,
        reset: request.reset,
    };

    match state
        .orchestrator
        .run_trigger(request.token.as_deref(), options)
        .await
    {
        Ok(report) => ApiResponse::success(report).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Map a failed trigger to its HTTP shape.
fn error_response(error: &SyncError) -> Response {
    let (status, code) = match error {
        SyncError::TriggerDisabled => (StatusCode::SERVICE_UNAVAILABLE, "TRIGGER_DISABLED"),
        SyncError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "SYNC_FAILED"),
    };
    (status, Json(ErrorResponse::new(code, error.to_string()))).into_response()
}
