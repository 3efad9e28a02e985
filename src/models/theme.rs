//! Theme registry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered theme directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
    pub id: i64,
    pub name: String,
    pub directory: String,
    pub active: bool,
    pub version: String,
    pub author: String,
    pub description: String,
    pub screenshot: String,
    pub created_at: DateTime<Utc>,
}

/// Contents of a theme's `theme.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeManifest {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub screenshot: String,
}

pub(crate) fn default_version() -> String {
    "1.0.0".to_string()
}

pub(crate) fn default_author() -> String {
    "Unknown".to_string()
}
