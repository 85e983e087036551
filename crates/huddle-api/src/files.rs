use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tracing::{error, info};

use huddle_types::api::UploadResponse;

use crate::blobs::is_valid_key;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 50 MB upload limit for files
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// POST /files: raw bytes in, content key out. The request's Content-Type
/// is kept as the blob's MIME type.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    bytes: Bytes,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("empty upload"));
    }
    if bytes.len() > MAX_FILE_SIZE {
        return Err(ApiError::PayloadTooLarge);
    }

    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");

    let content_key = state.blobs.put(&bytes, mime_type).await.map_err(|e| {
        error!("Blob write failed: {}", e);
        ApiError::Internal(e.to_string())
    })?;
    info!("Stored blob {} ({} bytes)", content_key, bytes.len());

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            url: state.blobs.resolve_url(&content_key),
            content_key,
            size: bytes.len() as u64,
        }),
    ))
}

/// GET /files/{content_key}
pub async fn download_file(
    State(state): State<AppState>,
    Path(content_key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !is_valid_key(&content_key) {
        return Err(ApiError::BadRequest("invalid content key"));
    }

    let blob = state
        .blobs
        .get(&content_key)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;

    let disposition = if renders_inline(&blob.mime_type) { "inline" } else { "attachment" };
    Ok((
        [
            (header::CONTENT_TYPE, blob.mime_type),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
            (header::CONTENT_DISPOSITION, disposition.to_string()),
        ],
        blob.bytes,
    ))
}

/// Media the browser may show in place. Everything else, HTML and SVG
/// included, is served as a download so it never runs on this origin.
fn renders_inline(mime_type: &str) -> bool {
    let essence = mime_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    if essence == "image/svg+xml" {
        return false;
    }
    ["image/", "video/", "audio/"].iter().any(|prefix| essence.starts_with(prefix))
}
