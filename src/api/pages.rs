//! Admin page endpoints
//!
//! - GET/POST /api/admin/pages
//! - GET /api/admin/pages/templates - layouts the active theme offers
//! - GET/PUT/DELETE /api/admin/pages/{id}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::api::middleware::{ApiError, AuthenticatedUser};
use crate::api::state::AppState;
use crate::models::{CreatePageInput, Page, UpdatePageInput};
use crate::services::available_templates;

#[derive(Debug, Serialize)]
pub struct TemplateChoice {
    pub value: String,
    pub label: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_pages).post(create_page))
        .route("/templates", get(list_templates))
        .route("/{id}", get(get_page).put(update_page).delete(delete_page))
}

async fn list_pages(State(state): State<AppState>) -> Result<Json<Vec<Page>>, ApiError> {
    Ok(Json(state.pages.list().await?))
}

async fn list_templates(State(state): State<AppState>) -> Json<Vec<TemplateChoice>> {
    let names = state.read_engine().template_names();
    Json(
        available_templates(names)
            .into_iter()
            .map(|(value, label)| TemplateChoice { value, label })
            .collect(),
    )
}

async fn get_page(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Page>, ApiError> {
    state
        .pages
        .get_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Page not found"))
}

async fn create_page(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(input): Json<CreatePageInput>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.pages.create(user.0.id, input).await?;
    Ok((StatusCode::CREATED, Json(page)))
}

async fn update_page(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<UpdatePageInput>,
) -> Result<Json<Page>, ApiError> {
    Ok(Json(state.pages.update(id, input).await?))
}

async fn delete_page(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    state.pages.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
