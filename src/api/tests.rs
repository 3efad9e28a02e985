use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use super::*;
use crate::cache::create_cache;
use crate::config::{CacheConfig, Config};
use crate::db::{create_test_pool, migrations};
use crate::models::{CreateUserInput, SettingType};
use crate::services::email::testing::RecordingMailer;
use crate::services::email::EmailService;
use crate::services::fingerprint;
use crate::services::settings::keys;

const PASSWORD: &str = "Adm1n!Pass";

struct Harness {
    server: TestServer,
    state: AppState,
    _dir: TempDir,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.theme.path = dir.path().join("themes");
    config.theme.plugin_path = dir.path().join("plugins");
    config.upload.path = dir.path().join("uploads");
    config.security.secret_key = "router-test-secret-0123456789".to_string();

    let pool = create_test_pool().await.unwrap();
    migrations::run_migrations(&pool).await.unwrap();
    let cache = create_cache(&CacheConfig::default()).await.unwrap();
    let state = AppState::build(config, pool, cache).await.unwrap();
    state.settings.init_defaults().await.unwrap();

    let server = TestServer::new(build_router(state.clone())).unwrap();
    Harness {
        server,
        state,
        _dir: dir,
    }
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
}

/// Register the first account (an admin) and log it in
async fn admin_token(h: &Harness) -> String {
    let response = h
        .server
        .post("/api/auth/register")
        .json(&json!({ "username": "admin", "email": "admin@example.com", "password": PASSWORD }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    login(h, "admin").await
}

async fn login(h: &Harness, login: &str) -> String {
    let response = h
        .server
        .post("/api/auth/login")
        .json(&json!({ "login": login, "password": PASSWORD }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    response.json::<Value>()["token"].as_str().unwrap().to_string()
}

async fn create_post(h: &Harness, token: &str, title: &str, content: &str) -> Value {
    let response = h
        .server
        .post("/api/admin/posts")
        .add_header(header::AUTHORIZATION, bearer(token))
        .json(&json!({ "title": title, "content": content, "published": true }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    response.json::<Value>()
}

#[tokio::test]
async fn test_home_page_has_security_headers() {
    let h = harness().await;
    let response = h.server.get("/").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(response.text().contains("Webbly Site"));
    assert_eq!(response.header("x-frame-options"), "SAMEORIGIN");
    assert_eq!(response.header("x-content-type-options"), "nosniff");
    assert_eq!(response.header("x-xss-protection"), "1; mode=block");
    let csp = response.header("content-security-policy");
    assert!(csp.to_str().unwrap().starts_with("default-src 'self'"));
}

#[tokio::test]
async fn test_register_login_me_logout() {
    let h = harness().await;
    let token = admin_token(&h).await;

    let me = h
        .server
        .get("/api/auth/me")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    assert_eq!(me.status_code(), StatusCode::OK);
    let body = me.json::<Value>();
    assert_eq!(body["username"], "admin");
    assert_eq!(body["is_admin"], true);
    assert!(body.get("password_hash").is_none());

    // Registration closes after the first account
    let second = h
        .server
        .post("/api/auth/register")
        .json(&json!({ "username": "other", "email": "other@example.com", "password": PASSWORD }))
        .await;
    assert_eq!(second.status_code(), StatusCode::FORBIDDEN);

    let logout = h
        .server
        .post("/api/auth/logout")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    assert_eq!(logout.status_code(), StatusCode::OK);
    let cookie = logout.header(header::SET_COOKIE);
    assert!(cookie.to_str().unwrap().contains("Max-Age=0"));

    let me = h
        .server
        .get("/api/auth/me")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    assert_eq!(me.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_sets_session_cookie() {
    let h = harness().await;
    admin_token(&h).await;

    let response = h
        .server
        .post("/api/auth/login")
        .json(&json!({ "login": "admin@example.com", "password": PASSWORD }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let cookie = response.header(header::SET_COOKIE);
    let cookie = cookie.to_str().unwrap();
    assert!(cookie.starts_with("session="));
    assert!(cookie.contains("HttpOnly"));

    // The cookie alone authenticates
    let session = cookie.split(';').next().unwrap().to_string();
    let me = h
        .server
        .get("/api/auth/me")
        .add_header(header::COOKIE, HeaderValue::from_str(&session).unwrap())
        .await;
    assert_eq!(me.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_login_lockout_after_failures() {
    let h = harness().await;
    admin_token(&h).await;
    let max = h.state.config.security.max_login_attempts;

    for _ in 0..max {
        let response = h
            .server
            .post("/api/auth/login")
            .add_header(
                HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_static("10.1.1.1"),
            )
            .json(&json!({ "login": "admin", "password": "wrong" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    let response = h
        .server
        .post("/api/auth/login")
        .add_header(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static("10.1.1.2"),
        )
        .json(&json!({ "login": "admin", "password": PASSWORD }))
        .await;
    assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.json::<Value>()["error"]["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn test_login_form_sets_cookie_and_redirects() {
    let h = harness().await;
    admin_token(&h).await;

    let page = h.server.get("/auth/login").await;
    assert_eq!(page.status_code(), StatusCode::OK);
    assert!(page.text().contains("name=\"csrf_token\""));

    let csrf = h.state.signer.csrf_token(
        &fingerprint("10.3.3.3", "webbly-form"),
        3600,
        Utc::now(),
    );
    let submit = |password: &'static str| {
        h.server
            .post("/auth/login")
            .add_header(
                HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_static("10.3.3.3"),
            )
            .add_header(header::USER_AGENT, HeaderValue::from_static("webbly-form"))
            .form(&[
                ("csrf_token", csrf.as_str()),
                ("login", "admin"),
                ("password", password),
            ])
    };

    let wrong = submit("Wr0ng!Pass").await;
    assert_eq!(wrong.status_code(), StatusCode::UNAUTHORIZED);
    assert!(wrong.text().contains("Invalid credentials"));

    let ok = submit(PASSWORD).await;
    assert_eq!(ok.status_code(), StatusCode::SEE_OTHER);
    assert_eq!(ok.header(header::LOCATION), "/");
    let cookie = ok.header(header::SET_COOKIE);
    assert!(cookie.to_str().unwrap().starts_with("session="));

    let forged = h
        .server
        .post("/auth/login")
        .form(&[("csrf_token", "1.x"), ("login", "admin"), ("password", PASSWORD)])
        .await;
    assert_eq!(forged.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reset_request_always_succeeds() {
    let h = harness().await;
    admin_token(&h).await;

    for email in ["admin@example.com", "nobody@example.com"] {
        let response = h
            .server
            .post("/api/auth/reset-password-request")
            .json(&json!({ "email": email }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    let response = h
        .server
        .post("/api/auth/reset-password")
        .json(&json!({ "token": "garbage", "password": PASSWORD }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // The mailed link opens a themed form carrying the token
    let form = h.server.get("/auth/reset-password?token=abc.def").await;
    assert_eq!(form.status_code(), StatusCode::OK);
    assert!(form.text().contains("abc.def"));
    let missing = h.server.get("/auth/reset-password").await;
    assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reset_password_with_token() {
    let h = harness().await;
    admin_token(&h).await;
    let (_, token) = h
        .state
        .users
        .generate_reset_token("admin@example.com")
        .await
        .unwrap()
        .unwrap();

    let response = h
        .server
        .post("/api/auth/reset-password")
        .json(&json!({ "token": token, "password": "N3w!Password" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = h
        .server
        .post("/api/auth/login")
        .json(&json!({ "login": "admin", "password": "N3w!Password" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_routes_require_admin() {
    let h = harness().await;
    let admin = admin_token(&h).await;

    let anonymous = h.server.get("/api/admin/dashboard").await;
    assert_eq!(anonymous.status_code(), StatusCode::UNAUTHORIZED);

    let editor = h
        .state
        .users
        .create_admin(CreateUserInput {
            username: "editor".to_string(),
            email: "editor@example.com".to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap();
    let toggled = h
        .server
        .post(&format!("/api/admin/users/{}/toggle-admin", editor.id))
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .await;
    assert_eq!(toggled.status_code(), StatusCode::OK);
    assert_eq!(toggled.json::<Value>()["is_admin"], false);

    let editor_token = login(&h, "editor").await;
    let forbidden = h
        .server
        .get("/api/admin/dashboard")
        .add_header(header::AUTHORIZATION, bearer(&editor_token))
        .await;
    assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(forbidden.json::<Value>()["error"]["code"], "FORBIDDEN");

    let dashboard = h
        .server
        .get("/api/admin/dashboard")
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .await;
    assert_eq!(dashboard.status_code(), StatusCode::OK);
    assert_eq!(dashboard.json::<Value>()["users"], 2);
}

#[tokio::test]
async fn test_post_page_and_likes() {
    let h = harness().await;
    let token = admin_token(&h).await;
    let post = create_post(&h, &token, "Hello World", "First **post** body").await;
    assert_eq!(post["slug"], "hello-world");

    let page = h.server.get("/post/hello-world").await;
    assert_eq!(page.status_code(), StatusCode::OK);
    assert!(page.text().contains("<strong>post</strong>"));

    let id = post["id"].as_i64().unwrap();
    let like = |ip: &'static str| {
        h.server
            .post(&format!("/api/posts/{}/like", id))
            .add_header(
                HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_static(ip),
            )
    };
    assert_eq!(like("10.0.0.1").await.json::<Value>()["likes"], 1);
    assert_eq!(like("10.0.0.1").await.json::<Value>()["likes"], 1);
    assert_eq!(like("10.0.0.2").await.json::<Value>()["likes"], 2);

    let missing = h.server.post("/api/posts/9999/like").await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

    let related = h.server.get(&format!("/api/posts/{}/related", id)).await;
    assert_eq!(related.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_drafts_are_hidden() {
    let h = harness().await;
    let token = admin_token(&h).await;
    let response = h
        .server
        .post("/api/admin/posts")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "title": "Secret Draft", "content": "not yet" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);

    let page = h.server.get("/post/secret-draft").await;
    assert_eq!(page.status_code(), StatusCode::NOT_FOUND);
    assert!(page.text().contains("Not Found"));
}

#[tokio::test]
async fn test_comment_form_checks_csrf() {
    let h = harness().await;
    let token = admin_token(&h).await;
    create_post(&h, &token, "Open Thread", "Say something").await;

    let forged = h
        .server
        .post("/post/open-thread/comment")
        .form(&[
            ("csrf_token", "123.abc"),
            ("content", "hi"),
            ("author_name", "Ann"),
            ("author_email", "ann@example.com"),
        ])
        .await;
    assert_eq!(forged.status_code(), StatusCode::BAD_REQUEST);

    let csrf = h.state.signer.csrf_token(
        &fingerprint("10.2.2.2", "webbly-test"),
        3600,
        Utc::now(),
    );
    let accepted = h
        .server
        .post("/post/open-thread/comment")
        .add_header(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static("10.2.2.2"),
        )
        .add_header(header::USER_AGENT, HeaderValue::from_static("webbly-test"))
        .form(&[
            ("csrf_token", csrf.as_str()),
            ("content", "Nice post"),
            ("author_name", "Ann"),
            ("author_email", "ann@example.com"),
        ])
        .await;
    assert_eq!(accepted.status_code(), StatusCode::SEE_OTHER);
    assert_eq!(accepted.header(header::LOCATION), "/post/open-thread#comments");

    let pending = h
        .server
        .get("/api/admin/comments")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    let body = pending.json::<Value>();
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["approved"], false);

    // Pending comments stay off the page until approved
    assert!(!h.server.get("/post/open-thread").await.text().contains("Nice post"));
    let id = body["items"][0]["id"].as_i64().unwrap();
    let approve = h
        .server
        .post(&format!("/api/admin/comments/{}/approve", id))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    assert_eq!(approve.status_code(), StatusCode::NO_CONTENT);
    assert!(h.server.get("/post/open-thread").await.text().contains("Nice post"));
}

#[tokio::test]
async fn test_page_template_variants() {
    let h = harness().await;
    let token = admin_token(&h).await;

    let templates = h
        .server
        .get("/api/admin/pages/templates")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    let values: Vec<String> = templates
        .json::<Vec<Value>>()
        .iter()
        .map(|t| t["value"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(values[0], "default");
    assert!(values.contains(&"sidebar".to_string()));
    assert!(values.contains(&"landing".to_string()));

    for (title, template) in [
        ("Plain", "default"),
        ("About Us", "sidebar"),
        ("Wide", "full-width"),
        ("Launch", "landing"),
        ("Odd One", "gallery"),
    ] {
        let response = h
            .server
            .post("/api/admin/pages")
            .add_header(header::AUTHORIZATION, bearer(&token))
            .json(&json!({ "title": title, "content": "Page body", "template": template, "published": true }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
    }

    let plain = h.server.get("/page/plain").await.text();
    assert!(plain.contains(r#"<body class="">"#));
    assert!(plain.contains(r#"<nav class="breadcrumbs container">"#));
    assert!(plain.contains("by admin"));
    assert!(!plain.contains(r#"<aside class="sidebar">"#));

    let sidebar = h.server.get("/page/about-us").await;
    assert_eq!(sidebar.status_code(), StatusCode::OK);
    let sidebar = sidebar.text();
    assert!(sidebar.contains(r#"<body class="with-sidebar">"#));
    assert!(sidebar.contains(r#"<aside class="sidebar">"#));
    assert!(sidebar.contains(r#"<li><a href="/page/launch">Launch</a></li>"#));

    let wide = h.server.get("/page/wide").await.text();
    assert!(wide.contains(r#"<body class="full-width">"#));
    assert!(!wide.contains(r#"class="breadcrumbs"#));
    assert!(wide.contains("<h1>Wide</h1>"));

    let landing = h.server.get("/page/launch").await.text();
    assert!(landing.contains(r#"<body class="landing">"#));
    assert!(landing.contains(r#"<section class="hero">"#));
    assert!(landing.contains(r#"<p class="lead">Page body</p>"#));
    assert!(!landing.contains(r#"<article class="page">"#));

    // No page-gallery.html in the theme: falls back to page.html
    let fallback = h.server.get("/page/odd-one").await;
    assert_eq!(fallback.status_code(), StatusCode::OK);
    let fallback = fallback.text();
    assert!(fallback.contains(r#"<body class="">"#));
    assert!(fallback.contains(r#"<article class="page">"#));
    assert!(fallback.contains("<h1>Odd One</h1>"));
}

#[tokio::test]
async fn test_contact_form_mails_admin() {
    let h = harness().await;
    let form_page = h.server.get("/contact").await;
    assert_eq!(form_page.status_code(), StatusCode::OK);
    assert!(form_page.text().contains(r#"<form method="post" action="/contact">"#));

    let csrf = h.state.signer.csrf_token(
        &fingerprint("10.4.4.4", "webbly-contact"),
        3600,
        Utc::now(),
    );
    let send = |server: &TestServer, email: &'static str, message: &'static str| {
        server
            .post("/contact")
            .add_header(
                HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_static("10.4.4.4"),
            )
            .add_header(header::USER_AGENT, HeaderValue::from_static("webbly-contact"))
            .form(&[
                ("csrf_token", csrf.as_str()),
                ("name", "Dana"),
                ("email", email),
                ("message", message),
            ])
    };

    // No admin address configured
    let unavailable = send(&h.server, "dana@example.com", "Hello there").await;
    assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);

    let mailer = Arc::new(RecordingMailer::default());
    let mut state = h.state.clone();
    state.email = Arc::new(EmailService::with_mailer(
        mailer.clone(),
        Some("owner@example.com".into()),
    ));
    let server = TestServer::new(build_router(state)).unwrap();

    let invalid = send(&server, "not-an-address", "Hello there").await;
    assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
    let body = invalid.text();
    assert!(body.contains("Invalid email address"));
    assert!(body.contains("Hello there"));
    assert!(mailer.sent.lock().unwrap().is_empty());

    let sent = send(&server, "dana@example.com", "Hello there").await;
    assert_eq!(sent.status_code(), StatusCode::SEE_OTHER);
    assert_eq!(sent.header(header::LOCATION), "/contact?sent=1");
    {
        let outbox = mailer.sent.lock().unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].to, "owner@example.com");
        assert!(outbox[0].body.contains("Dana <dana@example.com>"));
        assert!(outbox[0].body.contains("Hello there"));
    }
    assert!(server
        .get("/contact?sent=1")
        .await
        .text()
        .contains("your message has been sent"));

    let forged = server
        .post("/contact")
        .form(&[
            ("csrf_token", "1.x"),
            ("name", "Dana"),
            ("email", "dana@example.com"),
            ("message", "Hi"),
        ])
        .await;
    assert_eq!(forged.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(mailer.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_maintenance_mode() {
    let h = harness().await;
    let token = admin_token(&h).await;
    h.state
        .settings
        .set_setting(keys::MAINTENANCE_MODE, "true", SettingType::Bool)
        .await
        .unwrap();

    let home = h.server.get("/").await;
    assert_eq!(home.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(home.text().contains("maintenance"));

    let api = h.server.get("/api/posts/1/related").await;
    assert_eq!(api.status_code(), StatusCode::SERVICE_UNAVAILABLE);

    // Auth stays reachable and admins see the site
    login(&h, "admin").await;
    let admin_home = h
        .server
        .get("/")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    assert_eq!(admin_home.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_search_feeds_and_sitemaps() {
    let h = harness().await;
    let token = admin_token(&h).await;
    create_post(&h, &token, "Rust Release", "The compiler got faster").await;

    let empty = h.server.get("/search?q=").await;
    assert_eq!(empty.status_code(), StatusCode::SEE_OTHER);
    assert_eq!(empty.header(header::LOCATION), "/");

    let results = h.server.get("/search?q=compiler").await;
    assert_eq!(results.status_code(), StatusCode::OK);
    assert!(results.text().contains("<mark>compiler</mark>"));

    let rss = h.server.get("/feed").await;
    assert_eq!(rss.status_code(), StatusCode::OK);
    assert!(rss.text().contains("Rust Release"));
    assert!(h.server.get("/feed/atom").await.text().contains("<feed"));
    assert_eq!(h.server.get("/feed.json").await.status_code(), StatusCode::OK);

    let sitemap = h.server.get("/sitemap.xml").await;
    assert!(sitemap.text().contains("/post/rust-release"));
    let index = h.server.get("/sitemap-index.xml").await;
    assert!(index.text().contains("sitemap-posts-1.xml"));
    let posts = h.server.get("/sitemap-posts-1.xml").await;
    assert_eq!(posts.status_code(), StatusCode::OK);
    assert!(posts.text().contains("/post/rust-release"));
}

#[tokio::test]
async fn test_not_found_pages() {
    let h = harness().await;

    let html = h.server.get("/no/such/page").await;
    assert_eq!(html.status_code(), StatusCode::NOT_FOUND);
    assert!(html.text().contains("The requested resource could not be found."));

    let api = h.server.get("/api/nothing-here").await;
    assert_eq!(api.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(api.json::<Value>()["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_theme_assets_and_media_upload() {
    let h = harness().await;
    let token = admin_token(&h).await;

    let css = h.server.get("/theme/style.css").await;
    assert_eq!(css.status_code(), StatusCode::OK);

    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(b"hello".to_vec())
            .file_name("notes.txt")
            .mime_type("text/plain"),
    );
    let upload = h
        .server
        .post("/api/admin/media")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .multipart(form)
        .await;
    assert_eq!(upload.status_code(), StatusCode::CREATED);
    let file = upload.json::<Value>();
    let path = file["path"].as_str().unwrap().to_string();

    let served = h.server.get(&format!("/uploads/{}", path)).await;
    assert_eq!(served.status_code(), StatusCode::OK);
    assert_eq!(served.text(), "hello");

    let listed = h
        .server
        .get("/api/admin/media?kind=document")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    assert_eq!(listed.json::<Vec<Value>>().len(), 1);

    let deleted = h
        .server
        .delete(&format!("/api/admin/media/{}", path))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    assert_eq!(deleted.status_code(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_settings_and_themes_api() {
    let h = harness().await;
    let token = admin_token(&h).await;

    let updated = h
        .server
        .put("/api/admin/settings")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "site_title": "Renamed", "posts_per_page": 5 }))
        .await;
    assert_eq!(updated.status_code(), StatusCode::OK);
    assert_eq!(updated.json::<Value>()["site_title"], "Renamed");
    assert!(h.server.get("/").await.text().contains("Renamed"));

    let bad = h
        .server
        .put("/api/admin/settings")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "posts_per_page": "many" }))
        .await;
    assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);

    let themes = h
        .server
        .get("/api/admin/themes")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    let themes = themes.json::<Vec<Value>>();
    assert_eq!(themes.len(), 1);
    assert_eq!(themes[0]["directory"], "default");

    let activated = h
        .server
        .post("/api/admin/themes/default/activate")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    assert_eq!(activated.status_code(), StatusCode::OK);
    assert_eq!(activated.json::<Value>()["active"], true);

    let missing = h
        .server
        .post("/api/admin/themes/nope/activate")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
}
