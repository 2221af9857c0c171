//! Admin API handlers.
//!
//! Every handler answers with the same JSON envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};

use vipcast_core::AppConfig;
use vipcast_core::config::app_specs_from;
use vipcast_engine::EngineError;

use crate::ApiState;

/// Provenance tag for apps loaded through the API.
const API_SOURCE: &str = "api";

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    /// A failure that still carries a payload, e.g. a partial reload report.
    fn partial(data: T, msg: &str) -> Json<Self> {
        Json(Self {
            success: false,
            data: Some(data),
            error: Some(msg.to_string()),
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

// ── Liveness ───────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

// ── Applications ───────────────────────────────────────────────

/// GET /api/v1/apps
pub async fn list_apps(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.engine.status().await)
}

/// GET /api/v1/apps/{name}
pub async fn get_app(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.engine.app_status(&name).await {
        Some(status) => ApiResponse::ok(status).into_response(),
        None => error_response("app not found", StatusCode::NOT_FOUND),
    }
}

/// Reload request body.
#[derive(Debug, Deserialize)]
pub struct ReloadRequest {
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

/// POST /api/v1/reload
pub async fn reload(State(state): State<ApiState>, Json(req): Json<ReloadRequest>) -> Response {
    let specs = match app_specs_from(&req.apps, API_SOURCE) {
        Ok(specs) => specs,
        Err(e) => {
            warn!(error = %e, "rejected reload request");
            return error_response(&e.to_string(), StatusCode::BAD_REQUEST);
        }
    };

    info!(apps = specs.len(), "reload requested via API");
    match state.engine.reload(specs).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(EngineError::ReloadApplyFailed(report)) => {
            let msg = format!("reload partially applied: {} app(s) failed", report.failures().count());
            (StatusCode::CONFLICT, ApiResponse::partial(*report, &msg)).into_response()
        }
        Err(e @ EngineError::Config(_)) => error_response(&e.to_string(), StatusCode::BAD_REQUEST),
        Err(e @ EngineError::ShuttingDown) => {
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Routing ────────────────────────────────────────────────────

/// GET /api/v1/peer
pub async fn get_peer(State(state): State<ApiState>) -> Response {
    match state.engine.peer_info().await {
        Ok(Some(peer)) => ApiResponse::ok(peer).into_response(),
        Ok(None) => error_response("peer not configured", StatusCode::NOT_FOUND),
        Err(e) => error_response(&e.to_string(), StatusCode::BAD_GATEWAY),
    }
}

// ── Lifecycle ──────────────────────────────────────────────────

/// POST /api/v1/shutdown
pub async fn shutdown(State(state): State<ApiState>) -> Response {
    info!("shutdown requested via API");
    state.shutdown.send_replace(true);
    (StatusCode::ACCEPTED, ApiResponse::ok("shutting down")).into_response()
}
