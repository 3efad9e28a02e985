//! Shared application state
//!
//! Wires repositories into services once at startup. Handlers receive a
//! cheap clone of [`AppState`].

use anyhow::{Context, Result};
use std::sync::{Arc, RwLockReadGuard};
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::config::Config;
use crate::db::repositories::{
    SqlxCommentRepository, SqlxPageRepository, SqlxPluginRepository, SqlxPostRepository,
    SqlxSessionRepository, SqlxSettingsRepository, SqlxThemeRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::plugin::HookManager;
use crate::services::{
    CommentService, EmailService, FeedService, LoginRateLimiter, MarkdownRenderer, MediaService,
    PageService, PluginService, PostService, SearchService, SettingsService, SitemapService,
    ThemeService, TokenSigner, UserService,
};
use crate::theme::{SharedThemeEngine, TemplateGlobals, ThemeEngine};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: DynDatabasePool,
    pub cache: Arc<Cache>,
    pub hooks: Arc<HookManager>,
    pub globals: Arc<TemplateGlobals>,
    pub theme_engine: SharedThemeEngine,
    pub signer: Arc<TokenSigner>,
    pub rate_limiter: Arc<LoginRateLimiter>,
    pub settings: Arc<SettingsService>,
    pub users: Arc<UserService>,
    pub posts: Arc<PostService>,
    pub pages: Arc<PageService>,
    pub comments: Arc<CommentService>,
    pub email: Arc<EmailService>,
    pub search: Arc<SearchService>,
    pub feeds: Arc<FeedService>,
    pub sitemap: Arc<SitemapService>,
    pub media: Arc<MediaService>,
    pub themes: Arc<ThemeService>,
    pub plugins: Arc<PluginService>,
}

impl AppState {
    /// Build every service on top of a migrated pool and load the template
    /// snapshots, the active theme and the active plugins
    pub async fn build(config: Config, pool: DynDatabasePool, cache: Arc<Cache>) -> Result<Self> {
        let config = Arc::new(config);
        let base_url = config.server.base_url();
        let cache_ttl = Duration::from_secs(config.cache.ttl_seconds);

        let hooks = Arc::new(HookManager::new());
        let globals = TemplateGlobals::new();
        let renderer = Arc::new(MarkdownRenderer::new());
        let signer = TokenSigner::new(&config.security.secret_key)?;

        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let post_repo = SqlxPostRepository::boxed(pool.clone());
        let page_repo = SqlxPageRepository::boxed(pool.clone());

        let settings = Arc::new(
            SettingsService::new(SqlxSettingsRepository::boxed(pool.clone()))
                .with_globals(globals.clone())
                .with_hooks(hooks.clone()),
        );
        let email = Arc::new(EmailService::new(&config.mail).with_globals(globals.clone()));
        let users = Arc::new(
            UserService::new(
                user_repo.clone(),
                SqlxSessionRepository::boxed(pool.clone()),
                config.security.clone(),
                signer.clone(),
            )
            .with_hooks(hooks.clone()),
        );
        let posts = Arc::new(PostService::new(post_repo.clone(), cache.clone()).with_hooks(hooks.clone()));
        let pages = Arc::new(
            PageService::new(page_repo.clone())
                .with_globals(globals.clone())
                .with_hooks(hooks.clone()),
        );
        let comments = Arc::new(
            CommentService::new(
                SqlxCommentRepository::boxed(pool.clone()),
                post_repo.clone(),
                user_repo,
                settings.clone(),
            )
            .with_email(email.clone(), base_url.clone())
            .with_hooks(hooks.clone()),
        );
        let search = Arc::new(SearchService::new(
            post_repo.clone(),
            page_repo.clone(),
            cache.clone(),
            cache_ttl,
        ));
        let feeds = Arc::new(FeedService::new(
            post_repo.clone(),
            settings.clone(),
            renderer.clone(),
            cache.clone(),
            base_url.clone(),
            cache_ttl,
        ));
        let sitemap = Arc::new(SitemapService::new(post_repo.clone(), page_repo.clone(), base_url));
        let media = Arc::new(MediaService::new(&config.upload, post_repo, page_repo));

        let engine = ThemeEngine::new(
            &config.theme.path,
            &config.theme.active,
            globals.clone(),
            renderer,
        )
        .context("Failed to initialise theme engine")?
        .shared();
        let themes = Arc::new(ThemeService::new(
            SqlxThemeRepository::boxed(pool.clone()),
            engine.clone(),
            config.upload.max_archive_size,
        ));
        let plugins = Arc::new(PluginService::new(
            SqlxPluginRepository::boxed(pool.clone()),
            hooks.clone(),
            config.theme.plugin_path.clone(),
        ));

        settings.refresh_snapshot().await?;
        pages.refresh_navigation().await?;
        if themes.list().await?.is_empty() {
            themes.scan().await?;
        }
        let current = themes.sync_engine().await?;
        info!("Rendering with theme '{}'", current);
        match plugins.load_active().await {
            Ok(n) if n > 0 => info!("Loaded {} active plugins", n),
            Ok(_) => {}
            Err(e) => warn!("Failed to load plugins: {}", e),
        }

        Ok(Self {
            rate_limiter: Arc::new(LoginRateLimiter::from_config(&config.security)),
            signer: Arc::new(signer),
            config,
            pool,
            cache,
            hooks,
            globals,
            theme_engine: engine,
            settings,
            users,
            posts,
            pages,
            comments,
            email,
            search,
            feeds,
            sitemap,
            media,
            themes,
            plugins,
        })
    }

    pub fn read_engine(&self) -> RwLockReadGuard<'_, ThemeEngine> {
        self.theme_engine
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn base_url(&self) -> String {
        self.config.server.base_url()
    }
}
