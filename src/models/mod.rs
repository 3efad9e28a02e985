//! Data models
//!
//! Database entities, their input types and the small view types the
//! templates and the JSON API render.

mod comment;
mod page;
mod pagination;
mod plugin;
mod post;
mod session;
mod setting;
mod theme;
mod user;

pub use comment::{Comment, CommentView, CreateCommentInput};
pub use page::{
    is_valid_variant_name, CreatePageInput, NavPage, Page, PageTemplate, UpdatePageInput,
};
pub use pagination::{ListParams, PagedResult};
pub use plugin::{Plugin, PluginManifest};
pub use post::{CreatePostInput, Post, UpdatePostInput};
pub use session::Session;
pub use setting::{Setting, SettingType, SettingValue};
pub use theme::{Theme, ThemeManifest};
pub use user::{CreateUserInput, User};
