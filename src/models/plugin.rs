//! Plugin registry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::theme::{default_author, default_version};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plugin {
    pub id: i64,
    pub name: String,
    pub directory: String,
    pub active: bool,
    pub version: String,
    pub author: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Contents of a plugin's `plugin.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default)]
    pub description: String,
    /// Hook names the plugin subscribes to
    #[serde(default)]
    pub hooks: Vec<String>,
}
