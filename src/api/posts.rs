//! Public post API
//!
//! - POST /api/posts/{id}/like
//! - GET /api/posts/{id}/related

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, ClientInfo};
use crate::api::state::AppState;
use crate::services::search::DEFAULT_RELATED_LIMIT;

#[derive(Debug, Serialize, Deserialize)]
pub struct LikeResponse {
    pub likes: i64,
}

#[derive(Debug, Deserialize)]
pub struct RelatedQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelatedPost {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub url: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/like", post(like_post))
        .route("/{id}/related", get(related_posts))
}

/// Count a like once per visitor fingerprint and return the total
async fn like_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    client: ClientInfo,
) -> Result<Json<LikeResponse>, ApiError> {
    let likes = state.posts.like(id, &client.fingerprint()).await?;
    Ok(Json(LikeResponse { likes }))
}

async fn related_posts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<RelatedQuery>,
) -> Result<Json<Vec<RelatedPost>>, ApiError> {
    let post = state
        .posts
        .get_by_id(id)
        .await?
        .filter(|p| p.published)
        .ok_or_else(|| ApiError::not_found("Post not found"))?;
    let limit = query.limit.unwrap_or(DEFAULT_RELATED_LIMIT).clamp(1, 20);

    let related = state.search.related(&post, limit).await?;
    Ok(Json(
        related
            .into_iter()
            .map(|p| RelatedPost {
                url: format!("/post/{}", p.slug),
                id: p.id,
                title: p.title,
                slug: p.slug,
            })
            .collect(),
    ))
}
