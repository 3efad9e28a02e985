//! Theme management endpoints
//!
//! - GET /api/admin/themes
//! - POST /api/admin/themes/scan
//! - POST /api/admin/themes/{id}/activate - id or directory name
//! - POST /api/admin/themes/upload - multipart zip archive

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::api::middleware::ApiError;
use crate::api::state::AppState;
use crate::models::Theme;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_themes))
        .route("/scan", post(scan_themes))
        .route("/upload", post(upload_theme))
        .route("/{id}/activate", post(activate_theme))
}

async fn list_themes(State(state): State<AppState>) -> Result<Json<Vec<Theme>>, ApiError> {
    Ok(Json(state.themes.list().await?))
}

async fn scan_themes(State(state): State<AppState>) -> Result<Json<Vec<Theme>>, ApiError> {
    state.themes.scan().await?;
    Ok(Json(state.themes.list().await?))
}

async fn activate_theme(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Theme>, ApiError> {
    Ok(Json(state.themes.activate(&id).await?))
}

async fn upload_theme(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation_error(format!("Failed to read upload: {}", e)))?
        .ok_or_else(|| ApiError::validation_error("No file uploaded"))?;

    let filename = field.file_name().unwrap_or("theme.zip").to_string();
    if !filename.to_lowercase().ends_with(".zip") {
        return Err(ApiError::validation_error("Themes must be uploaded as .zip archives"));
    }
    let data = field
        .bytes()
        .await
        .map_err(|e| ApiError::validation_error(format!("Failed to read file: {}", e)))?;

    let theme = state.themes.install_archive(&data).await?;
    Ok((StatusCode::CREATED, Json(theme)))
}
