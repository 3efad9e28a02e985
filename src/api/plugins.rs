//! Plugin management endpoints
//!
//! - GET /api/admin/plugins
//! - POST /api/admin/plugins/scan
//! - POST /api/admin/plugins/{id}/toggle

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::api::middleware::ApiError;
use crate::api::state::AppState;
use crate::models::Plugin;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_plugins))
        .route("/scan", post(scan_plugins))
        .route("/{id}/toggle", post(toggle_plugin))
}

async fn list_plugins(State(state): State<AppState>) -> Result<Json<Vec<Plugin>>, ApiError> {
    Ok(Json(state.plugins.list().await?))
}

async fn scan_plugins(State(state): State<AppState>) -> Result<Json<Vec<Plugin>>, ApiError> {
    state.plugins.scan().await?;
    Ok(Json(state.plugins.list().await?))
}

async fn toggle_plugin(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Plugin>, ApiError> {
    Ok(Json(state.plugins.toggle(id).await?))
}
