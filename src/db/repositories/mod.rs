//! Database repositories
//!
//! One trait per entity plus its sqlx implementation. Services depend on the
//! traits so tests can swap storage freely.

pub mod comment;
pub mod page;
pub mod plugin;
pub mod post;
pub mod session;
pub mod settings;
pub mod theme;
pub mod user;

pub use comment::{CommentRepository, SqlxCommentRepository};
pub use page::{PageRepository, SqlxPageRepository};
pub use plugin::{PluginRepository, SqlxPluginRepository};
pub use post::{PostRepository, SqlxPostRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use settings::{SettingsRepository, SqlxSettingsRepository};
pub use theme::{SqlxThemeRepository, ThemeRepository};
pub use user::{SqlxUserRepository, UserRepository};
