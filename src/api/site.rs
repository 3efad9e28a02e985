//! Public HTML site
//!
//! Renders the active theme for the home page, posts, pages and search,
//! accepts comment and contact forms, and serves feeds, sitemaps and
//! static assets.

use axum::{
    extract::{FromRequestParts, Path, Query, Request, State},
    http::{header, request::Parts, StatusCode, Uri},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tera::Context as TeraContext;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use crate::api::middleware::{ApiError, AuthenticatedUser, ClientInfo, SessionToken};
use crate::api::state::AppState;
use crate::models::{CreateCommentInput, ListParams, User};
use crate::services::email::EmailError;
use crate::services::search::{excerpt, highlight, DEFAULT_EXCERPT_LENGTH, DEFAULT_RELATED_LIMIT};
use crate::services::settings::keys;
use crate::services::sitemap::URLS_PER_SITEMAP;
use crate::services::user::validate_email;
use crate::theme::{CurrentUser, SiteContext};

/// Build the public site router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/post/{slug}", get(show_post))
        .route("/post/{slug}/comment", post(submit_comment))
        .route("/page/{slug}", get(show_page))
        .route("/search", get(search))
        .route("/contact", get(contact_page).post(submit_contact))
        .route("/feed", get(rss_feed))
        .route("/feed/atom", get(atom_feed))
        .route("/feed.json", get(json_feed))
        .route("/sitemap.xml", get(sitemap))
        .route("/sitemap-index.xml", get(sitemap_index))
        .route("/theme/{*path}", get(theme_asset))
}

/// Who is looking at the page
pub struct Visitor {
    pub user: Option<User>,
    pub session: Option<String>,
    pub client: ClientInfo,
}

impl Visitor {
    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_admin)
    }

    /// Key CSRF tokens are bound to: the session, or the visitor fingerprint
    pub fn csrf_key(&self) -> String {
        self.session
            .clone()
            .unwrap_or_else(|| self.client.fingerprint())
    }

    pub(crate) fn site_context(&self, state: &AppState, path: &str) -> SiteContext {
        let token = state.signer.csrf_token(
            &self.csrf_key(),
            state.config.security.csrf_token_ttl_seconds,
            Utc::now(),
        );
        SiteContext::new(&state.globals, path)
            .with_user(self.user.as_ref().map(|u| CurrentUser {
                id: u.id,
                username: u.username.clone(),
                is_admin: u.is_admin,
            }))
            .with_csrf(token)
    }
}

impl<S> FromRequestParts<S> for Visitor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let client = ClientInfo::from_request_parts(parts, state).await?;
        Ok(Visitor {
            user: parts.extensions.get::<AuthenticatedUser>().map(|u| u.0.clone()),
            session: parts.extensions.get::<SessionToken>().map(|t| t.0.clone()),
            client,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentForm {
    pub csrf_token: String,
    pub content: String,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContactQuery {
    #[serde(default)]
    pub sent: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContactForm {
    #[serde(skip_serializing)]
    pub csrf_token: String,
    pub name: String,
    pub email: String,
    pub message: String,
}

pub const CONTACT_MESSAGE_MAX_LENGTH: usize = 5000;

#[derive(Debug, Serialize)]
struct SearchHit {
    slug: String,
    title: String,
    snippet: String,
}

/// Render `template`, or the 500 page when rendering fails
pub(crate) fn render(state: &AppState, template: &str, ctx: &TeraContext) -> Response {
    let engine = state.read_engine();
    match engine.render(template, ctx) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Failed to render {}: {:#}", template, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Html(engine.render_error(500, ctx))).into_response()
        }
    }
}

/// Render a themed form page with an HTTP status; 404 when the theme has no such template
pub(crate) fn form_page(
    state: &AppState,
    visitor: &Visitor,
    template: &str,
    path: &str,
    status: StatusCode,
    fill: impl FnOnce(&mut TeraContext),
) -> Response {
    if !state.read_engine().has_template(template) {
        return error_page(state, StatusCode::NOT_FOUND, path);
    }
    let mut ctx = visitor.site_context(state, path).to_context();
    fill(&mut ctx);
    (status, render(state, template, &ctx)).into_response()
}

/// The theme's error page with a matching status
pub fn error_page(state: &AppState, status: StatusCode, path: &str) -> Response {
    let ctx = SiteContext::new(&state.globals, path).to_context();
    let html = state.read_engine().render_error(status.as_u16(), &ctx);
    (status, Html(html)).into_response()
}

fn failed(state: &AppState, path: &str, err: impl std::fmt::Display) -> Response {
    error!("Request for {} failed: {}", path, err);
    error_page(state, StatusCode::INTERNAL_SERVER_ERROR, path)
}

/// GET / - published posts, newest first
async fn index(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
    visitor: Visitor,
) -> Response {
    let per_page = match state.settings.get_int(keys::POSTS_PER_PAGE, 10).await {
        Ok(n) => n.clamp(1, 100) as u32,
        Err(e) => return failed(&state, "/", e),
    };
    let params = ListParams::new(query.page.unwrap_or(1), per_page);
    let result = match state.posts.list_published(&params).await {
        Ok(result) => result,
        Err(e) => return failed(&state, "/", e),
    };

    let mut ctx = visitor.site_context(&state, "/").to_context();
    ctx.insert("posts", &result.items);
    ctx.insert(
        "pagination",
        &serde_json::json!({
            "page": result.page,
            "total_pages": result.total_pages,
            "total": result.total,
            "has_next": result.has_next,
            "has_prev": result.has_prev,
        }),
    );
    render(&state, "index.html", &ctx)
}

/// GET /post/{slug} - a published post with its approved comments
async fn show_post(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    visitor: Visitor,
) -> Response {
    let path = format!("/post/{}", slug);
    let post = match state.posts.get_published_by_slug(&slug).await {
        Ok(Some(post)) => post,
        Ok(None) => return error_page(&state, StatusCode::NOT_FOUND, &path),
        Err(e) => return failed(&state, &path, e),
    };
    let comments = match state.comments.list_approved_for_post(post.id).await {
        Ok(comments) => comments,
        Err(e) => return failed(&state, &path, e),
    };
    let related = state
        .search
        .related(&post, DEFAULT_RELATED_LIMIT)
        .await
        .unwrap_or_else(|e| {
            warn!("Related posts for '{}' unavailable: {}", post.slug, e);
            Vec::new()
        });

    let mut ctx = visitor.site_context(&state, &path).to_context();
    ctx.insert("title", &post.title);
    ctx.insert("post", &post);
    ctx.insert("comments", &comments);
    ctx.insert("related", &related);
    ctx.insert(
        "comments_enabled",
        &state.globals.setting_bool(keys::ENABLE_COMMENTS, true),
    );
    render(&state, "post.html", &ctx)
}

/// GET /page/{slug} - rendered with the page's template variant
async fn show_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    visitor: Visitor,
) -> Response {
    let path = format!("/page/{}", slug);
    let page = match state.pages.get_by_slug(&slug, !visitor.is_admin()).await {
        Ok(Some(page)) => page,
        Ok(None) => return error_page(&state, StatusCode::NOT_FOUND, &path),
        Err(e) => return failed(&state, &path, e),
    };

    let mut ctx = visitor.site_context(&state, &path).to_context();
    ctx.insert("title", &page.title);
    ctx.insert("page", &page);

    let engine = state.read_engine();
    match engine.render_or_fallback(&page.template.template_file(), "page.html", &ctx) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Failed to render page '{}': {:#}", page.slug, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Html(engine.render_error(500, &ctx))).into_response()
        }
    }
}

/// POST /post/{slug}/comment - comment form; redirects back to the post
async fn submit_comment(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    visitor: Visitor,
    Form(form): Form<CommentForm>,
) -> Response {
    let path = format!("/post/{}", slug);
    if let Err(e) = state
        .signer
        .verify_csrf_token(&form.csrf_token, &visitor.csrf_key(), Utc::now())
    {
        warn!("CSRF check failed for comment on '{}' from {}: {}", slug, visitor.client.ip, e);
        return error_page(&state, StatusCode::BAD_REQUEST, &path);
    }

    let post = match state.posts.get_published_by_slug(&slug).await {
        Ok(Some(post)) => post,
        Ok(None) => return error_page(&state, StatusCode::NOT_FOUND, &path),
        Err(e) => return failed(&state, &path, e),
    };

    let input = CreateCommentInput {
        content: form.content,
        author_name: form.author_name,
        author_email: form.author_email,
    };
    match state.comments.create(post.id, visitor.user.as_ref(), input).await {
        Ok(_) => Redirect::to(&format!("{}#comments", path)).into_response(),
        Err(e) => {
            let err = ApiError::from(e);
            error_page(&state, err.status(), &path)
        }
    }
}

/// GET /contact
async fn contact_page(
    State(state): State<AppState>,
    Query(query): Query<ContactQuery>,
    visitor: Visitor,
) -> Response {
    form_page(&state, &visitor, "contact.html", "/contact", StatusCode::OK, |ctx| {
        if query.sent.is_some() {
            ctx.insert("notice", "Thanks, your message has been sent.");
        }
    })
}

fn contact_problem(form: &ContactForm) -> Option<&'static str> {
    if form.name.trim().is_empty() || form.message.trim().is_empty() {
        Some("Name and message are required")
    } else if validate_email(form.email.trim()).is_err() {
        Some("Invalid email address")
    } else if form.message.chars().count() > CONTACT_MESSAGE_MAX_LENGTH {
        Some("Message is too long")
    } else {
        None
    }
}

/// POST /contact - forwards the message to the admin address
async fn submit_contact(
    State(state): State<AppState>,
    visitor: Visitor,
    Form(form): Form<ContactForm>,
) -> Response {
    let path = "/contact";
    if let Err(e) = state
        .signer
        .verify_csrf_token(&form.csrf_token, &visitor.csrf_key(), Utc::now())
    {
        warn!("CSRF check failed for contact form from {}: {}", visitor.client.ip, e);
        return error_page(&state, StatusCode::BAD_REQUEST, path);
    }
    if state.rate_limiter.is_ip_limited(visitor.client.ip).await {
        return error_page(&state, StatusCode::TOO_MANY_REQUESTS, path);
    }
    state.rate_limiter.record_ip_request(visitor.client.ip).await;

    let show_error = |status: StatusCode, message: &str| {
        form_page(&state, &visitor, "contact.html", path, status, |ctx| {
            ctx.insert("error", message);
            ctx.insert("contact", &form);
        })
    };
    if let Some(problem) = contact_problem(&form) {
        return show_error(StatusCode::BAD_REQUEST, problem);
    }

    let result = state
        .email
        .send_contact(form.name.trim(), form.email.trim(), form.message.trim())
        .await;
    match result {
        Ok(delivered) => {
            if !delivered {
                info!("Contact message from {} dropped: mail is not configured", visitor.client.ip);
            }
            Redirect::to("/contact?sent=1").into_response()
        }
        Err(EmailError::NoRecipient) => {
            warn!("Contact form submitted but no admin email is configured");
            show_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "The contact form is not available right now",
            )
        }
        Err(e) => {
            error!("Failed to send contact message: {}", e);
            show_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Your message could not be sent, please try again later",
            )
        }
    }
}

/// GET /search?q= - an empty query goes back home
async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    visitor: Visitor,
) -> Response {
    let q = query.q.unwrap_or_default().trim().to_string();
    if q.is_empty() {
        return Redirect::to("/").into_response();
    }
    let results = match state.search.search(&q, None, visitor.is_admin()).await {
        Ok(results) => results,
        Err(e) => return failed(&state, "/search", e),
    };

    let hit = |slug: &str, title: &str, content: &str| SearchHit {
        slug: slug.to_string(),
        title: title.to_string(),
        snippet: highlight(&excerpt(content, &q, DEFAULT_EXCERPT_LENGTH).0, &q),
    };
    let posts: Vec<SearchHit> = results
        .posts
        .iter()
        .map(|p| hit(&p.slug, &p.title, &p.content))
        .collect();
    let pages: Vec<SearchHit> = results
        .pages
        .iter()
        .map(|p| hit(&p.slug, &p.title, &p.content))
        .collect();

    let mut ctx = visitor.site_context(&state, "/search").to_context();
    ctx.insert("query", &q);
    ctx.insert("results", &serde_json::json!({ "posts": posts, "pages": pages }));
    render(&state, "search.html", &ctx)
}

fn xml_response(content_type: &'static str, body: anyhow::Result<String>) -> Response {
    match body {
        Ok(body) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            error!("Failed to generate {}: {:#}", content_type, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn rss_feed(State(state): State<AppState>) -> Response {
    xml_response("application/rss+xml; charset=utf-8", state.feeds.rss().await)
}

async fn atom_feed(State(state): State<AppState>) -> Response {
    xml_response("application/atom+xml; charset=utf-8", state.feeds.atom().await)
}

async fn json_feed(State(state): State<AppState>) -> Response {
    xml_response("application/feed+json; charset=utf-8", state.feeds.json().await)
}

async fn sitemap(State(state): State<AppState>) -> Response {
    xml_response("application/xml; charset=utf-8", state.sitemap.generate().await)
}

async fn sitemap_index(State(state): State<AppState>) -> Response {
    xml_response("application/xml; charset=utf-8", state.sitemap.generate_index().await)
}

/// `sitemap-posts-{n}.xml` -> `n`
fn post_sitemap_number(path: &str) -> Option<u32> {
    path.strip_prefix("/sitemap-posts-")?
        .strip_suffix(".xml")?
        .parse::<u32>()
        .ok()
        .filter(|n| *n > 0)
}

/// GET /theme/* - assets from the active theme's `static` dir
async fn theme_asset(State(state): State<AppState>, mut request: Request) -> Response {
    let dir = state.read_engine().static_dir();
    let rest = request
        .uri()
        .path()
        .strip_prefix("/theme")
        .unwrap_or("/")
        .to_string();
    match rest.parse::<Uri>() {
        Ok(uri) => *request.uri_mut() = uri,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    }

    match ServeDir::new(dir).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

/// Everything unmatched: numbered post sitemaps, then the themed 404 page
pub async fn fallback(State(state): State<AppState>, uri: Uri) -> Response {
    if let Some(n) = post_sitemap_number(uri.path()) {
        return xml_response(
            "application/xml; charset=utf-8",
            state.sitemap.generate_posts(n, URLS_PER_SITEMAP).await,
        );
    }
    if uri.path().starts_with("/api/") {
        return ApiError::not_found("No such endpoint").into_response();
    }
    error_page(&state, StatusCode::NOT_FOUND, uri.path())
}
