//! Services layer - business logic
//!
//! Services sit between the HTTP layer and the repositories. They validate
//! input, enforce the site's rules, keep caches and template snapshots fresh
//! and fire plugin hooks.

pub mod comment;
pub mod email;
pub mod feed;
pub mod markdown;
pub mod media;
pub mod page;
pub mod password;
pub mod plugin;
pub mod post;
pub mod rate_limiter;
pub mod search;
pub mod security;
pub mod settings;
pub mod sitemap;
pub mod tasks;
pub mod text;
pub mod theme;
pub mod user;

pub use comment::{CommentService, CommentServiceError};
pub use email::{EmailError, EmailService, Mailer, SmtpMailer};
pub use feed::FeedService;
pub use markdown::MarkdownRenderer;
pub use media::{MediaError, MediaFile, MediaKind, MediaService};
pub use page::{available_templates, PageService, PageServiceError};
pub use password::{check_password_strength, hash_password, verify_password};
pub use plugin::{PluginError, PluginService};
pub use post::{PostService, PostServiceError};
pub use rate_limiter::LoginRateLimiter;
pub use search::{SearchResults, SearchService};
pub use security::{fingerprint, TokenError, TokenSigner};
pub use settings::{SettingsService, SettingsServiceError};
pub use sitemap::SitemapService;
pub use tasks::{register_default_tasks, TaskContext, TaskScheduler};
pub use text::generate_slug;
pub use theme::ThemeService;
pub use user::{UserService, UserServiceError};
