//! Theme errors and the HTTP error table used by error pages

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("Theme not found: {0}")]
    NotFound(String),

    #[error("Template error: {0}")]
    TemplateError(String),

    /// Missing or unparsable `theme.json`
    #[error("Invalid theme metadata: {0}")]
    InvalidMetadata(String),

    #[error("Invalid theme archive: {0}")]
    InvalidArchive(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Name and description shown on error pages
pub fn http_error_info(code: u16) -> (&'static str, &'static str) {
    match code {
        400 => ("Bad Request", "The server could not understand your request."),
        401 => (
            "Unauthorized",
            "You need to be authenticated to access this resource.",
        ),
        403 => (
            "Forbidden",
            "You do not have permission to access this resource.",
        ),
        404 => ("Not Found", "The requested resource could not be found."),
        405 => (
            "Method Not Allowed",
            "The method used is not allowed for this resource.",
        ),
        429 => (
            "Too Many Requests",
            "You have made too many requests. Please try again later.",
        ),
        500 => (
            "Internal Server Error",
            "An unexpected error occurred on our servers.",
        ),
        503 => (
            "Service Unavailable",
            "The service is temporarily unavailable.",
        ),
        _ => ("Unknown Error", "An unknown error occurred."),
    }
}
