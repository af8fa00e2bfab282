use std::path::{Component, Path as FsPath, PathBuf};

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use brabas_types::api::{Claims, UploadResponse};

use crate::AppState;
use crate::error::ApiError;

/// PUT /storage/{bucket}/{*path}: store raw bytes as a public object and
/// return its URL. An existing object at the same path is replaced.
pub async fn upload(
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if !state.config.storage_buckets.iter().any(|b| *b == bucket) {
        return Err(ApiError::NotFound);
    }
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("empty upload".into()));
    }
    let relative = sanitize_object_path(&path)
        .ok_or_else(|| ApiError::BadRequest("invalid object path".into()))?;

    let file_path = state.config.storage_dir.join(&bucket).join(&relative);
    if let Some(parent) = file_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            error!("Failed to create {}: {}", parent.display(), e);
            ApiError::Internal
        })?;
    }

    let mut file = tokio::fs::File::create(&file_path).await.map_err(|e| {
        error!("Failed to create file {}: {}", file_path.display(), e);
        ApiError::Internal
    })?;
    file.write_all(&bytes).await.map_err(|e| {
        error!("Failed to write file {}: {}", file_path.display(), e);
        ApiError::Internal
    })?;

    let object = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join("/");
    info!("{} uploaded {}/{} ({} bytes)", claims.sub, bucket, object, bytes.len());

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            public_url: format!(
                "{}/storage/public/{}/{}",
                state.config.public_url.trim_end_matches('/'),
                bucket,
                object
            ),
        }),
    ))
}

/// Accept only plain relative segments, so an object can never land
/// outside its bucket directory.
fn sanitize_object_path(raw: &str) -> Option<PathBuf> {
    if raw.is_empty() || raw.starts_with('/') || raw.contains('\\') {
        return None;
    }
    if raw.split('/').any(|segment| segment.is_empty()) {
        return None;
    }

    let mut clean = PathBuf::new();
    for component in FsPath::new(raw).components() {
        match component {
            Component::Normal(segment) => clean.push(segment),
            _ => return None,
        }
    }
    Some(clean)
}
