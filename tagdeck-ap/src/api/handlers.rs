//! Shared response types and the small endpoints

use super::server::AppContext;
use crate::bridge::ws::serve_socket;
use crate::error::Error;
use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<StatusResponse>);

/// Log `e` and turn it into a response
pub fn api_error(e: Error) -> ApiError {
    let status = e.status_code();
    if status.is_server_error() {
        error!("Request failed: {}", e);
    }
    (
        status,
        Json(StatusResponse {
            status: format!("error: {}", e),
        }),
    )
}

pub fn ok_status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
    })
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "tagdeck-ap".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Playback
// ============================================================================

/// GET /trackprogress
pub async fn track_progress(State(ctx): State<AppContext>) -> Json<Value> {
    let snapshot = ctx.player.snapshot();
    Json(json!({
        "trackProgress": {
            "posPercent": snapshot.pos_percent,
            "time": snapshot.elapsed_secs,
            "duration": snapshot.duration_secs,
        }
    }))
}

// ============================================================================
// Real-time channel
// ============================================================================

/// GET /ws
pub async fn websocket(ws: WebSocketUpgrade, State(ctx): State<AppContext>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, ctx.hub, ctx.interpreter))
}
