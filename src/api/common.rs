//! Shared request types and error conversions for the API handlers

use serde::Deserialize;
use tracing::error;

use crate::api::middleware::ApiError;
use crate::models::ListParams;
use crate::services::{
    CommentServiceError, EmailError, MediaError, PageServiceError, PluginError, PostServiceError,
    SettingsServiceError, UserServiceError,
};
use crate::theme::ThemeError;

/// Default page number (1-indexed)
pub fn default_page() -> u32 {
    1
}

/// Default page size for admin lists
pub fn default_per_page() -> u32 {
    20
}

/// Pagination query parameters
#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl PaginationQuery {
    pub fn params(&self) -> ListParams {
        ListParams::new(self.page, self.per_page)
    }
}

/// Log the full error and hand the client a generic message
pub fn internal(err: impl std::fmt::Display) -> ApiError {
    error!("Request failed: {}", err);
    ApiError::internal_error("Internal server error")
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        internal(format!("{:#}", err))
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::UserExists(msg) => ApiError::conflict(msg),
            UserServiceError::RegistrationClosed => {
                ApiError::forbidden("Registration is closed")
            }
            UserServiceError::UserNotFound => ApiError::not_found("User not found"),
            UserServiceError::SessionExpired | UserServiceError::SessionNotFound => {
                ApiError::unauthorized("Invalid or expired session")
            }
            UserServiceError::InvalidToken => {
                ApiError::validation_error("Invalid or expired token")
            }
            UserServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            UserServiceError::InternalError(e) => internal(format!("{:#}", e)),
        }
    }
}

impl From<PostServiceError> for ApiError {
    fn from(err: PostServiceError) -> Self {
        match err {
            PostServiceError::NotFound(msg) => ApiError::not_found(format!("Post not found: {}", msg)),
            PostServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            PostServiceError::DuplicateSlug(slug) => {
                ApiError::conflict(format!("Post slug already exists: {}", slug))
            }
            PostServiceError::InternalError(e) => internal(format!("{:#}", e)),
        }
    }
}

impl From<PageServiceError> for ApiError {
    fn from(err: PageServiceError) -> Self {
        match err {
            PageServiceError::NotFound(msg) => ApiError::not_found(format!("Page not found: {}", msg)),
            PageServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            PageServiceError::DuplicateSlug(slug) => {
                ApiError::conflict(format!("Page slug already exists: {}", slug))
            }
            PageServiceError::InternalError(e) => internal(format!("{:#}", e)),
        }
    }
}

impl From<CommentServiceError> for ApiError {
    fn from(err: CommentServiceError) -> Self {
        match err {
            CommentServiceError::NotFound(id) => {
                ApiError::not_found(format!("Comment not found: {}", id))
            }
            CommentServiceError::PostNotFound(id) => {
                ApiError::not_found(format!("Post not found: {}", id))
            }
            CommentServiceError::Disabled => ApiError::forbidden("Comments are disabled"),
            CommentServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            CommentServiceError::InternalError(e) => internal(format!("{:#}", e)),
        }
    }
}

impl From<SettingsServiceError> for ApiError {
    fn from(err: SettingsServiceError) -> Self {
        match err {
            SettingsServiceError::InvalidValue { .. } | SettingsServiceError::InvalidKey(_) => {
                ApiError::validation_error(err.to_string())
            }
            SettingsServiceError::Storage(e) => internal(format!("{:#}", e)),
        }
    }
}

impl From<ThemeError> for ApiError {
    fn from(err: ThemeError) -> Self {
        match err {
            ThemeError::NotFound(name) => ApiError::not_found(format!("Theme not found: {}", name)),
            ThemeError::InvalidMetadata(_) | ThemeError::InvalidArchive(_) => {
                ApiError::validation_error(err.to_string())
            }
            ThemeError::TemplateError(_) => ApiError::validation_error(err.to_string()),
            ThemeError::IoError(e) => internal(e),
            ThemeError::Storage(e) => internal(format!("{:#}", e)),
        }
    }
}

impl From<PluginError> for ApiError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::NotFound(name) => ApiError::not_found(format!("Plugin not found: {}", name)),
            PluginError::InvalidManifest(_) => ApiError::validation_error(err.to_string()),
            PluginError::Io(e) => internal(e),
            PluginError::Storage(e) => internal(format!("{:#}", e)),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::NotAllowed(_) | MediaError::TooLarge { .. } | MediaError::InvalidPath(_) => {
                ApiError::validation_error(err.to_string())
            }
            MediaError::NotFound(path) => ApiError::not_found(format!("File not found: {}", path)),
            MediaError::Io(e) => internal(e),
            MediaError::Internal(e) => internal(format!("{:#}", e)),
        }
    }
}

impl From<EmailError> for ApiError {
    fn from(err: EmailError) -> Self {
        internal(err)
    }
}
