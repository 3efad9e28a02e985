//! API middleware
//!
//! Contains middleware and extractors for:
//! - Authentication (session cookie or Bearer token)
//! - Authorization (admin checks)
//! - Security response headers
//! - Maintenance mode

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::warn;

use crate::api::state::AppState;
use crate::models::User;
use crate::services::fingerprint;
use crate::theme::CurrentUser;

pub const SESSION_COOKIE: &str = "session";

/// Content-Security-Policy directives, in header order
const CSP_DIRECTIVES: &[(&str, &[&str])] = &[
    ("default-src", &["'self'"]),
    (
        "script-src",
        &["'self'", "'unsafe-inline'", "cdn.tailwindcss.com", "code.jquery.com"],
    ),
    (
        "style-src",
        &["'self'", "'unsafe-inline'", "fonts.googleapis.com", "cdn.tailwindcss.com"],
    ),
    ("img-src", &["'self'", "data:", "www.gravatar.com"]),
    ("font-src", &["'self'", "fonts.gstatic.com"]),
    ("connect-src", &["'self'"]),
    ("frame-src", &["'none'"]),
    ("object-src", &["'none'"]),
];

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

/// The signed-in user if there is one; never rejects
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl MaybeUser {
    pub fn current_user(&self) -> Option<CurrentUser> {
        self.0.as_ref().map(|u| CurrentUser {
            id: u.id,
            username: u.username.clone(),
            is_admin: u.is_admin,
        })
    }
}

/// Session id the request authenticated with
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

/// Where a request came from, for rate limiting and visitor fingerprints
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub ip: IpAddr,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.ip.to_string(), &self.user_agent)
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new("RATE_LIMITED", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new("SERVICE_UNAVAILABLE", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            "SERVICE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// Bearer token first, then the session cookie
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    let prefix = format!("{}=", SESSION_COOKIE);
    cookies
        .split(';')
        .filter_map(|c| c.trim().strip_prefix(prefix.as_str()))
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Optional authentication middleware
///
/// Resolves the session when there is one and stores the user in the request
/// extensions. Runs for every request so templates and the maintenance gate
/// know who is asking.
pub async fn optional_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if let Some(token) = extract_session_token(request.headers()) {
        match state.users.validate_session(&token).await {
            Ok(user) => {
                request.extensions_mut().insert(AuthenticatedUser(user));
                request.extensions_mut().insert(SessionToken(token));
            }
            Err(e) => tracing::debug!("Ignoring session token: {}", e),
        }
    }
    next.run(request).await
}

/// Authentication middleware
pub async fn require_auth(request: Request, next: Next) -> Result<Response, ApiError> {
    if request.extensions().get::<AuthenticatedUser>().is_none() {
        return Err(ApiError::unauthorized("Authentication required"));
    }
    Ok(next.run(request).await)
}

/// Admin authorization middleware
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.0.is_admin {
        warn!(
            "Forbidden admin access by '{}' to {}",
            user.0.username,
            request.uri().path()
        );
        return Err(ApiError::forbidden("Admin privileges required"));
    }

    Ok(next.run(request).await)
}

/// Security headers on every response
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));
    headers.insert("x-xss-protection", HeaderValue::from_static("1; mode=block"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    if let Ok(value) = HeaderValue::from_str(&content_security_policy()) {
        headers.insert(header::CONTENT_SECURITY_POLICY, value);
    }
    response
}

pub fn content_security_policy() -> String {
    CSP_DIRECTIVES
        .iter()
        .map(|(directive, sources)| format!("{} {}", directive, sources.join(" ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Redirect plain-HTTP requests (as reported by a proxy) to HTTPS
pub async fn force_https(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.config.security.force_https {
        return next.run(request).await;
    }
    let forwarded_http = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("http"));
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match (forwarded_http, host) {
        (true, Some(host)) => {
            let path = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            Redirect::permanent(&format!("https://{}{}", host, path)).into_response()
        }
        _ => next.run(request).await,
    }
}

/// Serve `maintenance.html` with 503 to everyone except admins and the auth routes
pub async fn maintenance(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.globals.setting_bool("maintenance_mode", false) {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let exempt = path.starts_with("/api/auth/")
        || path.starts_with("/auth/")
        || path.starts_with("/theme/");
    let is_admin = request
        .extensions()
        .get::<AuthenticatedUser>()
        .is_some_and(|u| u.0.is_admin);
    if exempt || is_admin {
        return next.run(request).await;
    }

    if path.starts_with("/api/") {
        return ApiError::unavailable("Site is under maintenance").into_response();
    }

    let ctx = crate::theme::SiteContext::new(&state.globals, path.as_str()).to_context();
    let html = {
        let engine = state.read_engine();
        if engine.has_template("maintenance.html") {
            engine
                .render("maintenance.html", &ctx)
                .unwrap_or_else(|_| engine.render_error(503, &ctx))
        } else {
            engine.render_error(503, &ctx)
        }
    };
    (StatusCode::SERVICE_UNAVAILABLE, Html(html)).into_response()
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(
            parts.extensions.get::<AuthenticatedUser>().map(|u| u.0.clone()),
        ))
    }
}

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        let connected = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(ClientInfo {
            ip: forwarded
                .or(connected)
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            user_agent,
        })
    }
}
