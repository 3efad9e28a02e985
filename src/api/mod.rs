//! API layer - HTTP handlers and routing
//!
//! - Public HTML site rendered by the active theme (`site`)
//! - Public JSON endpoints for likes and related posts (`posts`)
//! - Session authentication (`auth`)
//! - Admin JSON API under `/api/admin` (`admin`, `pages`, `comments`,
//!   `upload`, `theme`, `plugins`)

pub mod admin;
pub mod auth;
pub mod comments;
pub mod common;
pub mod middleware;
pub mod pages;
pub mod plugins;
pub mod posts;
pub mod site;
pub mod state;
pub mod theme;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, services::ServeDir, trace::TraceLayer,
};
use tracing::warn;

pub use middleware::{ApiError, AuthenticatedUser, MaybeUser};
pub use state::AppState;

/// Routes under `/api`
pub fn build_api_router(state: &AppState) -> Router<AppState> {
    let body_limit = state
        .config
        .upload
        .max_file_size
        .max(state.config.upload.max_archive_size) as usize;

    let admin_routes = Router::new()
        .merge(admin::router())
        .nest("/pages", pages::router())
        .nest("/comments", comments::router())
        .nest("/media", upload::router())
        .nest("/themes", theme::router())
        .nest("/plugins", plugins::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .route_layer(axum_middleware::from_fn(middleware::require_admin));

    let auth_routes = auth::public_router().merge(
        auth::protected_router().route_layer(axum_middleware::from_fn(middleware::require_auth)),
    );

    Router::new()
        .nest("/auth", auth_routes)
        .nest("/posts", posts::router())
        .nest("/admin", admin_routes)
}

/// Cross-origin access for the configured origin only; same-origin otherwise
fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let Some(origin) = origin else {
        return CorsLayer::new();
    };
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
            .allow_credentials(true),
        Err(e) => {
            warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
            CorsLayer::new()
        }
    }
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    let uploads = ServeDir::new(&state.config.upload.path);

    Router::new()
        .merge(site::router())
        .nest("/auth", auth::html_router())
        .nest("/api", build_api_router(&state))
        .nest_service("/uploads", uploads)
        .fallback(site::fallback)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::maintenance,
        ))
        // Runs before maintenance so admins get through
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::optional_auth,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::force_https,
        ))
        .layer(axum_middleware::from_fn(middleware::security_headers))
        .layer(cors_layer(state.config.server.cors_origin.as_deref()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests;
