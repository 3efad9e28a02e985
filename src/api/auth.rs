//! Authentication API endpoints
//!
//! - POST /api/auth/register - first user registration
//! - POST /api/auth/login - open a session (sets the cookie)
//! - POST /api/auth/logout - close the session
//! - GET /api/auth/me - current user
//! - POST /api/auth/reset-password-request - mail a reset link
//! - POST /api/auth/reset-password - set a new password from a token
//!
//! The HTML forms at /auth/login and /auth/reset-password drive the same
//! services with CSRF-checked form posts.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Extension, Form, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::middleware::{ApiError, AuthenticatedUser, ClientInfo, SessionToken, SESSION_COOKIE};
use crate::api::site::{error_page, form_page, Visitor};
use crate::api::state::AppState;
use crate::models::{CreateUserInput, User};

/// Request body for user login; `login` is a username or an email
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Routes open to everyone
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/reset-password-request", post(request_password_reset))
        .route("/reset-password", post(reset_password))
}

/// Theme-rendered sign-in and reset forms, mounted at /auth
pub fn html_router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_page).post(login_form))
        .route("/reset-password", get(reset_page).post(reset_form))
}

/// Routes that need a session
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(me))
}

fn session_cookie(state: &AppState, token: &str, max_age: i64) -> Result<HeaderValue, ApiError> {
    let secure = if state.config.security.force_https {
        "; Secure"
    } else {
        ""
    };
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        SESSION_COOKIE, token, max_age, secure
    );
    HeaderValue::from_str(&cookie).map_err(|e| ApiError::internal_error(e.to_string()))
}

/// Refuse the request when the client IP is over its budget
async fn check_ip(state: &AppState, client: &ClientInfo) -> Result<(), ApiError> {
    if state.rate_limiter.is_ip_limited(client.ip).await {
        return Err(ApiError::rate_limited("Too many requests, try again later"));
    }
    state.rate_limiter.record_ip_request(client.ip).await;
    Ok(())
}

/// POST /api/auth/register
///
/// Only the first account can register; it becomes the administrator.
async fn register(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(input): Json<CreateUserInput>,
) -> Result<impl IntoResponse, ApiError> {
    check_ip(&state, &client).await?;
    let user = state.users.register(input).await?;
    if let Err(e) = state.email.send_welcome(&user.email, &user.username).await {
        warn!("Welcome mail to {} failed: {}", user.email, e);
    }
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_ip(&state, &client).await?;
    let identifier = body.login.trim().to_string();
    if state.rate_limiter.is_identifier_limited(&identifier).await {
        return Err(ApiError::rate_limited(
            "Too many failed attempts, try again later",
        ));
    }

    let (user, session) = match state.users.login(&identifier, &body.password).await {
        Ok(pair) => pair,
        Err(e) => {
            state.rate_limiter.record_failed_attempt(&identifier).await;
            warn!("Login failed for '{}' from {}", identifier, client.ip);
            return Err(e.into());
        }
    };
    state.rate_limiter.clear_identifier(&identifier).await;
    info!("User '{}' logged in", user.username);

    let max_age = (session.expires_at - chrono::Utc::now()).num_seconds().max(0);
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, session_cookie(&state, &session.id, max_age)?);
    Ok((
        headers,
        Json(AuthResponse {
            user,
            token: session.id,
        }),
    ))
}

/// POST /api/auth/logout
async fn logout(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
) -> Result<impl IntoResponse, ApiError> {
    state.users.logout(&token.0).await?;
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, session_cookie(&state, "", 0)?);
    Ok((
        headers,
        Json(MessageResponse {
            message: "Logged out".to_string(),
        }),
    ))
}

/// GET /api/auth/me
async fn me(user: AuthenticatedUser) -> Json<User> {
    Json(user.0)
}

/// POST /api/auth/reset-password-request
///
/// Always answers 200 so the endpoint does not reveal which accounts exist.
async fn request_password_reset(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(body): Json<ResetRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    check_ip(&state, &client).await?;
    match state.users.generate_reset_token(&body.email).await {
        Ok(Some((user, token))) => {
            let url = format!(
                "{}/auth/reset-password?token={}",
                state.base_url(),
                urlencoding::encode(&token)
            );
            if let Err(e) = state
                .email
                .send_password_reset(&user.email, &user.username, &url)
                .await
            {
                warn!("Password reset mail to {} failed: {}", user.email, e);
            }
        }
        Ok(None) => info!("Password reset requested for unknown address"),
        Err(e) => warn!("Password reset request failed: {}", e),
    }
    Ok(Json(MessageResponse {
        message: "If the address is registered, a reset link is on its way".to_string(),
    }))
}

/// POST /api/auth/reset-password
async fn reset_password(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    check_ip(&state, &client).await?;
    let user = state.users.reset_password(&body.token, &body.password).await?;
    info!("Password reset for '{}'", user.username);
    Ok(Json(MessageResponse {
        message: "Password updated".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub csrf_token: String,
    pub login: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetTokenQuery {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetForm {
    pub csrf_token: String,
    pub token: String,
    pub password: String,
}

/// GET /auth/login
async fn login_page(State(state): State<AppState>, visitor: Visitor) -> Response {
    if visitor.user.is_some() {
        return Redirect::to("/").into_response();
    }
    form_page(&state, &visitor, "login.html", "/auth/login", StatusCode::OK, |_| {})
}

/// POST /auth/login - form sign-in; sets the cookie and goes home
async fn login_form(
    State(state): State<AppState>,
    visitor: Visitor,
    Form(form): Form<LoginForm>,
) -> Response {
    let path = "/auth/login";
    if let Err(e) = state
        .signer
        .verify_csrf_token(&form.csrf_token, &visitor.csrf_key(), Utc::now())
    {
        warn!("CSRF check failed for login from {}: {}", visitor.client.ip, e);
        return error_page(&state, StatusCode::BAD_REQUEST, path);
    }

    let identifier = form.login.trim().to_string();
    let show_error = |status: StatusCode, message: &str| {
        form_page(&state, &visitor, "login.html", path, status, |ctx| {
            ctx.insert("error", message);
            ctx.insert("login", &identifier);
        })
    };

    if check_ip(&state, &visitor.client).await.is_err()
        || state.rate_limiter.is_identifier_limited(&identifier).await
    {
        return show_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many attempts, try again later",
        );
    }

    let (user, session) = match state.users.login(&identifier, &form.password).await {
        Ok(pair) => pair,
        Err(e) => {
            state.rate_limiter.record_failed_attempt(&identifier).await;
            warn!("Login failed for '{}' from {}: {}", identifier, visitor.client.ip, e);
            return show_error(StatusCode::UNAUTHORIZED, "Invalid credentials");
        }
    };
    state.rate_limiter.clear_identifier(&identifier).await;
    info!("User '{}' logged in", user.username);

    let max_age = (session.expires_at - Utc::now()).num_seconds().max(0);
    match session_cookie(&state, &session.id, max_age) {
        Ok(cookie) => ([(header::SET_COOKIE, cookie)], Redirect::to("/")).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /auth/reset-password?token= - the link sent by mail
async fn reset_page(
    State(state): State<AppState>,
    visitor: Visitor,
    Query(query): Query<ResetTokenQuery>,
) -> Response {
    let path = "/auth/reset-password";
    if query.token.is_empty() {
        return error_page(&state, StatusCode::BAD_REQUEST, path);
    }
    form_page(&state, &visitor, "reset_password.html", path, StatusCode::OK, |ctx| {
        ctx.insert("token", &query.token);
    })
}

/// POST /auth/reset-password - form reset; sends the user to the login page
async fn reset_form(
    State(state): State<AppState>,
    visitor: Visitor,
    Form(form): Form<ResetForm>,
) -> Response {
    let path = "/auth/reset-password";
    if let Err(e) = state
        .signer
        .verify_csrf_token(&form.csrf_token, &visitor.csrf_key(), Utc::now())
    {
        warn!("CSRF check failed for password reset from {}: {}", visitor.client.ip, e);
        return error_page(&state, StatusCode::BAD_REQUEST, path);
    }
    if check_ip(&state, &visitor.client).await.is_err() {
        return error_page(&state, StatusCode::TOO_MANY_REQUESTS, path);
    }

    match state.users.reset_password(&form.token, &form.password).await {
        Ok(user) => {
            info!("Password reset for '{}'", user.username);
            Redirect::to("/auth/login").into_response()
        }
        Err(e) => {
            let err = ApiError::from(e);
            let status = err.status();
            let message = err.error.message;
            form_page(&state, &visitor, "reset_password.html", path, status, |ctx| {
                ctx.insert("error", &message);
                ctx.insert("token", &form.token);
            })
        }
    }
}
