//! Storage explorer endpoints
//!
//! Every `path` names a location on the storage medium and is resolved
//! beneath the storage root. Uploads stream through the transfer ring.

use super::handlers::{api_error, ok_status, ApiError, StatusResponse};
use super::paths::{normalize, resolve};
use super::server::AppContext;
use crate::bridge::action::Action;
use crate::error::Error;
use crate::playback::engine::is_stream_url;
use crate::upload::UploadSession;
use axum::{
    body::Body,
    extract::{Multipart, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tagdeck_common::{PlayMode, TrackCommand};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameQuery {
    pub srcpath: Option<String>,
    pub dstpath: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlayQuery {
    pub path: Option<String>,
    pub playmode: Option<u8>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ExplorerEntry {
    pub name: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dir: bool,
}

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| api_error(Error::BadRequest(format!("missing '{}' parameter", name))))
}

/// GET /explorer?path=
pub async fn list(
    State(ctx): State<AppContext>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<ExplorerEntry>>, ApiError> {
    let path = query.path.unwrap_or_else(|| "/".to_string());
    let dir = resolve(ctx.config.storage_root(), &path).map_err(api_error)?;

    let mut reader = match tokio::fs::read_dir(&dir).await {
        Ok(reader) => reader,
        Err(e) => {
            debug!("Cannot list {}: {}", path, e);
            return Err(api_error(Error::NotFound(format!("directory {}", path))));
        }
    };

    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(|e| api_error(e.into()))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        // Hidden entries, e.g. spotlight folders
        if name.starts_with('.') {
            continue;
        }
        let dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        entries.push(ExplorerEntry { name, dir });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(entries))
}

/// Stream one multipart field into `session`
async fn stream_field(
    session: &mut UploadSession,
    field: &mut axum::extract::multipart::Field<'_>,
) -> crate::error::Result<()> {
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| Error::UploadAborted(format!("client stream failed: {}", e)))?
    {
        session.write_chunk(&chunk).await?;
    }
    Ok(())
}

/// POST /explorer?path= (multipart)
pub async fn upload(
    State(ctx): State<AppContext>,
    Query(query): Query<PathQuery>,
    mut multipart: Multipart,
) -> Result<Json<StatusResponse>, ApiError> {
    let folder = query.path.unwrap_or_else(|| "/".to_string());
    let dir = resolve(ctx.config.storage_root(), &folder).map_err(api_error)?;

    let mut stored = 0;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(Error::BadRequest(format!("malformed upload: {}", e))))?
    {
        let Some(file_name) = field
            .file_name()
            .and_then(|name| Path::new(name).file_name())
            .map(|name| name.to_os_string())
        else {
            debug!("Skipping multipart field without a file name");
            continue;
        };

        let target = dir.join(&file_name);
        let mut session = ctx.uploads.begin(&target).map_err(api_error)?;

        // An error drops the session, which cancels the writer
        stream_field(&mut session, &mut field).await.map_err(api_error)?;
        let report = session.finish().await.map_err(api_error)?;
        info!(
            "Stored {} ({} bytes in {} chunks)",
            report.path.display(),
            report.total_bytes(),
            report.chunks()
        );
        stored += 1;
    }

    if stored == 0 {
        return Err(api_error(Error::BadRequest("no file in upload".into())));
    }
    Ok(ok_status())
}

/// GET /explorerdownload?path=
pub async fn download(
    State(ctx): State<AppContext>,
    Query(query): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let path = required(query.path, "path")?;
    let file = resolve(ctx.config.storage_root(), &path).map_err(api_error)?;

    match tokio::fs::metadata(&file).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            warn!("DOWNLOAD: cannot download directory {}", path);
            return Err(api_error(Error::NotFound(format!("{} is a directory", path))));
        }
        Err(_) => {
            warn!("DOWNLOAD: file not found: {}", path);
            return Err(api_error(Error::NotFound(path)));
        }
    }

    let data = tokio::fs::read(&file).await.map_err(|e| api_error(e.into()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", name),
            ),
        ],
        Body::from(data),
    )
        .into_response())
}

/// DELETE /explorer?path=
pub async fn delete(
    State(ctx): State<AppContext>,
    Query(query): Query<PathQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let path = required(query.path, "path")?;
    let target = resolve(ctx.config.storage_root(), &path).map_err(api_error)?;
    if target == ctx.config.storage_root() {
        return Err(api_error(Error::BadRequest("refusing to delete the storage root".into())));
    }

    let meta = tokio::fs::metadata(&target)
        .await
        .map_err(|_| api_error(Error::NotFound(path.clone())))?;

    // The file may be in use
    if let Err(e) = ctx.player.execute(Action::Track(TrackCommand::Stop)).await {
        warn!("Could not stop playback before delete: {}", e);
    }

    let result = if meta.is_dir() {
        tokio::fs::remove_dir_all(&target).await
    } else {
        tokio::fs::remove_file(&target).await
    };
    result.map_err(|e| api_error(e.into()))?;
    info!("DELETE: {} deleted", path);
    Ok(ok_status())
}

/// PUT /explorer?path=
pub async fn create(
    State(ctx): State<AppContext>,
    Query(query): Query<PathQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let path = required(query.path, "path")?;
    let target = resolve(ctx.config.storage_root(), &path).map_err(api_error)?;
    tokio::fs::create_dir_all(&target)
        .await
        .map_err(|e| api_error(e.into()))?;
    info!("CREATE: {} created", path);
    Ok(ok_status())
}

/// PATCH /explorer?srcpath=&dstpath=
pub async fn rename(
    State(ctx): State<AppContext>,
    Query(query): Query<RenameQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let src_path = required(query.srcpath, "srcpath")?;
    let dst_path = required(query.dstpath, "dstpath")?;
    let root = ctx.config.storage_root();
    let src = resolve(root, &src_path).map_err(api_error)?;
    let dst = resolve(root, &dst_path).map_err(api_error)?;

    if tokio::fs::metadata(&src).await.is_err() {
        return Err(api_error(Error::NotFound(src_path)));
    }
    tokio::fs::rename(&src, &dst)
        .await
        .map_err(|e| api_error(e.into()))?;
    info!("RENAME: {} renamed to {}", src_path, dst_path);
    Ok(ok_status())
}

/// POST /exploreraudio?path=&playmode=
pub async fn play(
    State(ctx): State<AppContext>,
    Query(query): Query<PlayQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let path = required(query.path, "path")?;
    let mode = query
        .playmode
        .and_then(PlayMode::from_code)
        .filter(|mode| *mode != PlayMode::NoPlaylist)
        .ok_or_else(|| api_error(Error::BadRequest("missing or invalid 'playmode'".into())))?;

    let path = if is_stream_url(&path) {
        path
    } else {
        normalize(&path).map_err(api_error)?
    };

    let outcome = ctx
        .player
        .execute(Action::PlayPath { path, mode })
        .await
        .map_err(api_error)?;
    debug!("Play request outcome: {:?}", outcome);
    Ok(ok_status())
}
