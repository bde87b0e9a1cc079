//! Tag assignment endpoints

use super::handlers::{api_error, ApiError, StatusResponse};
use super::server::AppContext;
use crate::bridge::action::Action;
use crate::error::Error;
use crate::tags::{RestoreSummary, TagRecord};
use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tagdeck_common::TrackCommand;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct TagQuery {
    pub id: Option<String>,
    #[serde(rename = "ids-only")]
    pub ids_only: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub file_or_url: String,
    pub play_mode: Option<u8>,
    pub mod_id: Option<u8>,
}

async fn all_tags(ctx: &AppContext, ids_only: bool) -> Result<Json<Value>, ApiError> {
    if ids_only {
        let ids = ctx.tags.ids().await.map_err(api_error)?;
        return Ok(Json(json!(ids)));
    }
    let entries = ctx.tags.entries().await.map_err(api_error)?;
    let records: Vec<Value> = entries
        .iter()
        .map(|(id, record)| record.to_json(id))
        .collect();
    Ok(Json(Value::Array(records)))
}

async fn one_tag(ctx: &AppContext, id: &str) -> Result<Option<TagRecord>, ApiError> {
    ctx.tags.lookup(id).await.map_err(api_error)
}

/// GET /rfid, /rfid?id=, /rfid?ids-only
///
/// An unknown `id` falls back to the full listing.
pub async fn get_tags(
    State(ctx): State<AppContext>,
    Query(query): Query<TagQuery>,
) -> Result<Json<Value>, ApiError> {
    if let Some(id) = query.id.as_deref().filter(|id| !id.is_empty()) {
        if let Some(record) = one_tag(&ctx, id).await? {
            return Ok(Json(record.to_json(id)));
        }
    }
    all_tags(&ctx, query.ids_only.is_some()).await
}

/// GET /rfid/ids-only
pub async fn ids_only(State(ctx): State<AppContext>) -> Result<Json<Value>, ApiError> {
    all_tags(&ctx, true).await
}

/// GET /rfid/:id
pub async fn get_tag(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match one_tag(&ctx, &id).await? {
        Some(record) => Ok(Json(record.to_json(&id))),
        None => Err(api_error(Error::NotFound(format!("tag {}", id)))),
    }
}

/// POST /rfid
pub async fn assign(
    State(ctx): State<AppContext>,
    Json(request): Json<AssignRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.id.is_empty() {
        return Err(api_error(Error::Validation("/rfid (POST): Missing tag id".into())));
    }
    let record = match (request.mod_id, request.play_mode) {
        (Some(mod_id), _) => ctx.tags.assign_module(&request.id, mod_id).await,
        (None, Some(mode)) => ctx.tags.assign(&request.id, &request.file_or_url, mode).await,
        (None, None) => Err(Error::Validation(
            "/rfid (POST): Invalid playMode or modId".into(),
        )),
    }
    .map_err(api_error)?;
    Ok(Json(record.to_json(&request.id)))
}

/// DELETE /rfid?id=
pub async fn remove(
    State(ctx): State<AppContext>,
    Query(query): Query<TagQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = query
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| api_error(Error::Validation("/rfid (DELETE): Missing tag id".into())))?;

    if one_tag(&ctx, &id).await?.is_none() {
        return Err(api_error(Error::NotFound(format!("tag {}", id))));
    }

    // Tag in use
    if ctx.player.snapshot().current_tag.as_deref() == Some(id.as_str()) {
        if let Err(e) = ctx.player.execute(Action::Track(TrackCommand::Stop)).await {
            warn!("Could not stop playback of tag {}: {}", id, e);
        }
    }

    ctx.tags.remove(&id).await.map_err(api_error)?;
    Ok(Json(StatusResponse {
        status: format!("{} removed successfully", id),
    }))
}

/// POST /rfidnvserase
///
/// Writes a final backup, then erases every assignment.
pub async fn erase_all(State(ctx): State<AppContext>) -> Result<Json<Value>, ApiError> {
    let saved = ctx.tags.backup().await.map_err(api_error)?;
    let erased = ctx.tags.clear().await.map_err(api_error)?;
    info!("Erased {} assignments after backing up {}", erased, saved);
    Ok(Json(json!({ "status": "ok", "erased": erased })))
}

/// Copy every multipart field into `path`
async fn receive_to(multipart: &mut Multipart, path: &std::path::Path) -> crate::error::Result<usize> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut received = 0usize;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadRequest(format!("malformed upload: {}", e)))?
    {
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| Error::BadRequest(format!("upload interrupted: {}", e)))?
        {
            file.write_all(&chunk).await?;
            received += chunk.len();
        }
    }
    file.flush().await?;
    Ok(received)
}

/// POST /upload (multipart backup file)
///
/// The upload lands in a temporary file in the storage root, is imported and
/// then removed.
pub async fn restore(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Json<RestoreSummary>, ApiError> {
    let tmp = ctx
        .config
        .storage_root()
        .join(format!("_{}", chrono::Utc::now().timestamp_millis()));

    let received = match receive_to(&mut multipart, &tmp).await {
        Ok(received) => received,
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(api_error(e));
        }
    };

    info!("Restoring tags from {} byte backup", received);
    let summary = ctx.tags.restore(&tmp).await.map_err(api_error)?;
    Ok(Json(summary))
}
