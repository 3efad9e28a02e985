//! Media endpoints
//!
//! - GET /api/admin/media?kind=image
//! - POST /api/admin/media - multipart, field `file`
//! - DELETE /api/admin/media/{*path}

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::ApiError;
use crate::api::state::AppState;
use crate::services::{MediaFile, MediaKind};

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub kind: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_media).post(upload_media))
        .route("/{*path}", delete(delete_media))
}

fn parse_kind(kind: Option<&str>) -> Result<Option<MediaKind>, ApiError> {
    match kind.map(str::trim).filter(|k| !k.is_empty()) {
        None => Ok(None),
        Some(name) => MediaKind::ALL
            .into_iter()
            .find(|k| k.as_str() == name)
            .map(Some)
            .ok_or_else(|| ApiError::validation_error(format!("Unknown media kind: {}", name))),
    }
}

async fn list_media(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> Result<Json<Vec<MediaFile>>, ApiError> {
    let kind = parse_kind(query.kind.as_deref())?;
    Ok(Json(state.media.list(kind).await?))
}

/// Accepts multipart/form-data with a single file field named "file"
/// and an optional "kind" field restricting the allowed extensions.
async fn upload_media(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut kind = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation_error(format!("Failed to read upload: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "kind" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::validation_error(format!("Failed to read field: {}", e)))?;
                kind = parse_kind(Some(&text))?;
            }
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::validation_error(format!("Failed to read file: {}", e)))?;
                let file = state.media.save(&data, &filename, kind).await?;
                return Ok((StatusCode::CREATED, Json(file)));
            }
            _ => {}
        }
    }
    Err(ApiError::validation_error("No file uploaded"))
}

async fn delete_media(State(state): State<AppState>, Path(path): Path<String>) -> Result<StatusCode, ApiError> {
    state.media.delete(&path).await?;
    Ok(StatusCode::NO_CONTENT)
}
