//! Settings endpoints

use super::handlers::{api_error, ok_status, ApiError, StatusResponse};
use super::server::AppContext;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, warn};

#[derive(Debug, Deserialize)]
pub struct SectionQuery {
    pub section: Option<String>,
}

/// GET /settings[?section=]
pub async fn get_settings(
    State(ctx): State<AppContext>,
    Query(query): Query<SectionQuery>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = ctx.player.snapshot();
    ctx.settings
        .to_json(query.section.as_deref(), &snapshot)
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /settings
///
/// Sections are written in a fixed order; any failure answers 500.
pub async fn post_settings(
    State(ctx): State<AppContext>,
    Json(doc): Json<Value>,
) -> Result<Json<StatusResponse>, ApiError> {
    match ctx.settings.apply(&doc).await {
        Ok(actions) => {
            for action in actions {
                if let Err(e) = ctx.player.send(action) {
                    warn!("Settings change not forwarded to the player: {}", e);
                }
            }
            Ok(ok_status())
        }
        Err(e) => {
            error!("Error saving settings: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusResponse {
                    status: "error saving settings".to_string(),
                }),
            ))
        }
    }
}
