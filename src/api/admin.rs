//! Admin API endpoints
//!
//! Everything here sits behind `require_admin`:
//! - GET /api/admin/dashboard
//! - /api/admin/posts (CRUD)
//! - /api/admin/users (list, toggle admin)
//! - /api/admin/settings (get all, update)
//! - POST /api/admin/cache/clear
//! - POST /api/admin/search/reindex

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AuthenticatedUser};
use crate::api::state::AppState;
use crate::cache::CacheLayer;
use crate::models::{CreatePostInput, PagedResult, Post, SettingValue, UpdatePostInput, User};

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub posts: i64,
    pub published_posts: i64,
    pub pages: i64,
    pub comments: i64,
    pub pending_comments: i64,
    pub comments_this_week: i64,
    pub users: i64,
    pub active_theme: String,
    pub active_plugins: usize,
    pub recent_posts: Vec<Post>,
}

#[derive(Debug, Serialize)]
pub struct ReindexResponse {
    pub indexed: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/{id}", get(get_post).put(update_post).delete(delete_post))
        .route("/users", get(list_users))
        .route("/users/{id}/toggle-admin", post(toggle_admin))
        .route("/settings", get(get_settings).put(update_settings))
        .route("/cache/clear", post(clear_cache))
        .route("/search/reindex", post(reindex))
}

/// GET /api/admin/dashboard
async fn dashboard(State(state): State<AppState>) -> Result<Json<DashboardStats>, ApiError> {
    let week_ago = Utc::now() - Duration::days(7);
    let active_plugins = state.plugins.list().await?.iter().filter(|p| p.active).count();
    let active_theme = state.read_engine().current_theme().to_string();

    Ok(Json(DashboardStats {
        posts: state.posts.count(false).await?,
        published_posts: state.posts.count(true).await?,
        pages: state.pages.count().await?,
        comments: state.comments.count().await?,
        pending_comments: state.comments.count_pending().await?,
        comments_this_week: state.comments.count_since(week_ago).await?,
        users: state.users.count().await?,
        active_theme,
        active_plugins,
        recent_posts: state.posts.recent(5).await?,
    }))
}

/// GET /api/admin/posts - drafts included
async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<Post>>, ApiError> {
    Ok(Json(state.posts.list_all(&query.params()).await?))
}

async fn get_post(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Post>, ApiError> {
    state
        .posts
        .get_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Post not found"))
}

async fn create_post(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(input): Json<CreatePostInput>,
) -> Result<impl IntoResponse, ApiError> {
    let post = state.posts.create(user.0.id, input).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<UpdatePostInput>,
) -> Result<Json<Post>, ApiError> {
    Ok(Json(state.posts.update(id, input).await?))
}

async fn delete_post(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    state.posts.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<User>>, ApiError> {
    Ok(Json(state.users.list(&query.params()).await?))
}

/// POST /api/admin/users/{id}/toggle-admin
async fn toggle_admin(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.users.toggle_admin(&actor.0, id).await?))
}

async fn get_settings(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, SettingValue>>, ApiError> {
    Ok(Json(state.settings.get_all().await?))
}

/// PUT /api/admin/settings - a JSON object of key/value pairs
async fn update_settings(
    State(state): State<AppState>,
    Json(values): Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<Json<BTreeMap<String, SettingValue>>, ApiError> {
    state.settings.update_many(&values).await?;
    info!("Updated {} settings", values.len());
    Ok(Json(state.settings.get_all().await?))
}

async fn clear_cache(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.cache.clear().await?;
    info!("Cache cleared from the admin API");
    Ok(StatusCode::NO_CONTENT)
}

async fn reindex(State(state): State<AppState>) -> Result<Json<ReindexResponse>, ApiError> {
    let indexed = state.search.reindex().await?;
    Ok(Json(ReindexResponse { indexed }))
}
