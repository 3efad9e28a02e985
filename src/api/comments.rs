//! Comment moderation endpoints
//!
//! - GET /api/admin/comments
//! - POST /api/admin/comments/{id}/approve
//! - DELETE /api/admin/comments/{id}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};

use crate::api::common::PaginationQuery;
use crate::api::middleware::ApiError;
use crate::api::state::AppState;
use crate::models::{Comment, PagedResult};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_comments))
        .route("/{id}/approve", post(approve_comment))
        .route("/{id}", delete(delete_comment))
}

/// Every comment, pending ones included, newest first
async fn list_comments(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<Comment>>, ApiError> {
    Ok(Json(state.comments.list_all(&query.params()).await?))
}

async fn approve_comment(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    state.comments.approve(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_comment(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    state.comments.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
