//! Settings service
//!
//! Typed access to the `settings` table plus the default set a fresh site
//! starts with. Every write republishes the template snapshot.

use anyhow::Result;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::db::repositories::SettingsRepository;
use crate::models::{SettingType, SettingValue};
use crate::plugin::{hook_names, HookManager};
use crate::theme::TemplateGlobals;

/// Well-known keys
pub mod keys {
    pub const SITE_TITLE: &str = "site_title";
    pub const SITE_DESCRIPTION: &str = "site_description";
    pub const SITE_LANGUAGE: &str = "site_language";
    pub const POSTS_PER_PAGE: &str = "posts_per_page";
    pub const ENABLE_COMMENTS: &str = "enable_comments";
    pub const COMMENT_MODERATION: &str = "comment_moderation";
    pub const FOOTER_TEXT: &str = "footer_text";
    pub const MAINTENANCE_MODE: &str = "maintenance_mode";
    pub const ENABLE_DIGESTS: &str = "enable_digests";
}

/// Settings a new site starts with
pub const DEFAULT_SETTINGS: &[(&str, &str, SettingType)] = &[
    ("site_title", "Webbly Site", SettingType::String),
    ("site_description", "A Webbly powered website", SettingType::String),
    ("posts_per_page", "10", SettingType::Int),
    ("enable_comments", "true", SettingType::Bool),
    ("comment_moderation", "true", SettingType::Bool),
    ("theme_options", "{}", SettingType::Json),
    ("menu_items", "[]", SettingType::Json),
    ("footer_text", "Powered by Webbly", SettingType::String),
    ("social_links", "{}", SettingType::Json),
    ("analytics_id", "", SettingType::String),
    ("custom_css", "", SettingType::String),
    ("custom_js", "", SettingType::String),
    ("maintenance_mode", "false", SettingType::Bool),
];

#[derive(Debug, Error)]
pub enum SettingsServiceError {
    #[error("Invalid value for setting '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid setting key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Normalise `value` into its stored text form for `setting_type`
pub fn normalize_value(
    key: &str,
    value: &str,
    setting_type: SettingType,
) -> Result<String, SettingsServiceError> {
    let invalid = |reason: String| SettingsServiceError::InvalidValue {
        key: key.to_string(),
        reason,
    };
    match setting_type {
        SettingType::String => Ok(value.to_string()),
        SettingType::Bool => Ok((value.trim().to_lowercase() == "true").to_string()),
        SettingType::Int => value
            .trim()
            .parse::<i64>()
            .map(|n| n.to_string())
            .map_err(|_| invalid(format!("'{}' is not an integer", value))),
        SettingType::Json => serde_json::from_str::<Value>(value)
            .map(|v| v.to_string())
            .map_err(|e| invalid(e.to_string())),
    }
}

pub struct SettingsService {
    repo: Arc<dyn SettingsRepository>,
    globals: Option<Arc<TemplateGlobals>>,
    hooks: Option<Arc<HookManager>>,
}

impl SettingsService {
    pub fn new(repo: Arc<dyn SettingsRepository>) -> Self {
        Self {
            repo,
            globals: None,
            hooks: None,
        }
    }

    pub fn with_globals(mut self, globals: Arc<TemplateGlobals>) -> Self {
        self.globals = Some(globals);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookManager>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Stored value for `key`, or `default` when missing or unparseable
    pub async fn get_setting(&self, key: &str, default: SettingValue) -> Result<SettingValue> {
        Ok(self
            .repo
            .get(key)
            .await?
            .and_then(|s| s.typed_value())
            .unwrap_or(default))
    }

    pub async fn get_string(&self, key: &str, default: &str) -> Result<String> {
        Ok(match self.repo.get(key).await? {
            Some(setting) => setting.value,
            None => default.to_string(),
        })
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(match self.repo.get(key).await? {
            Some(setting) => setting.value.to_lowercase() == "true",
            None => default,
        })
    }

    pub async fn get_int(&self, key: &str, default: i64) -> Result<i64> {
        Ok(self
            .repo
            .get(key)
            .await?
            .and_then(|s| s.value.trim().parse().ok())
            .unwrap_or(default))
    }

    pub async fn get_json(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self
            .repo
            .get(key)
            .await?
            .and_then(|s| serde_json::from_str(&s.value).ok())
            .unwrap_or(default))
    }

    /// Write a setting with an explicit type
    pub async fn set_setting(
        &self,
        key: &str,
        value: &str,
        setting_type: SettingType,
    ) -> Result<(), SettingsServiceError> {
        validate_key(key)?;
        let stored = normalize_value(key, value, setting_type)?;
        self.repo.set(key, &stored, setting_type).await?;
        debug!("Setting '{}' updated", key);
        self.after_write(&[key]).await?;
        Ok(())
    }

    /// Apply a batch of JSON values, e.g. from the admin API.
    ///
    /// Booleans, integers, and objects or arrays pick their own type. Strings
    /// keep the type already stored for the key and are validated against it.
    pub async fn update_many(
        &self,
        values: &serde_json::Map<String, Value>,
    ) -> Result<(), SettingsServiceError> {
        let mut prepared = Vec::with_capacity(values.len());
        for (key, value) in values {
            validate_key(key)?;
            let (text, setting_type) = match value {
                Value::Bool(b) => (b.to_string(), SettingType::Bool),
                Value::Number(n) if n.is_i64() => (n.to_string(), SettingType::Int),
                Value::Array(_) | Value::Object(_) => (value.to_string(), SettingType::Json),
                Value::Null => (String::new(), SettingType::String),
                Value::Number(n) => (n.to_string(), SettingType::String),
                Value::String(s) => {
                    let existing = self
                        .repo
                        .get(key)
                        .await?
                        .map(|s| s.setting_type)
                        .unwrap_or_default();
                    (s.clone(), existing)
                }
            };
            let stored = normalize_value(key, &text, setting_type)?;
            prepared.push((key.as_str(), stored, setting_type));
        }

        for (key, stored, setting_type) in &prepared {
            self.repo.set(key, stored, *setting_type).await?;
        }
        let keys: Vec<&str> = prepared.iter().map(|(k, _, _)| *k).collect();
        self.after_write(&keys).await?;
        Ok(())
    }

    /// Every setting, typed. Malformed `int`/`json` values are left out.
    pub async fn get_all(&self) -> Result<BTreeMap<String, SettingValue>> {
        Ok(self
            .repo
            .get_all()
            .await?
            .into_iter()
            .filter_map(|s| s.typed_value().map(|v| (s.key, v)))
            .collect())
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.repo.delete(key).await?;
        if existed {
            self.after_write(&[key]).await?;
        }
        Ok(existed)
    }

    pub async fn clear(&self) -> Result<u64> {
        let removed = self.repo.clear().await?;
        self.after_write(&[]).await?;
        Ok(removed)
    }

    /// Insert defaults for keys that are not set yet; returns how many were added
    pub async fn init_defaults(&self) -> Result<usize> {
        let mut added = 0;
        for (key, value, setting_type) in DEFAULT_SETTINGS {
            if self.repo.insert_if_absent(key, value, *setting_type).await? {
                added += 1;
            }
        }
        if added > 0 {
            info!("Initialised {} default settings", added);
        }
        self.refresh_snapshot().await?;
        Ok(added)
    }

    /// Reload the template snapshot from storage
    pub async fn refresh_snapshot(&self) -> Result<()> {
        if let Some(globals) = &self.globals {
            let map: HashMap<String, SettingValue> = self.get_all().await?.into_iter().collect();
            globals.publish_settings(map);
        }
        Ok(())
    }

    async fn after_write(&self, keys: &[&str]) -> Result<()> {
        self.refresh_snapshot().await?;
        if let Some(hooks) = &self.hooks {
            hooks.trigger(
                hook_names::SETTINGS_UPDATED,
                serde_json::json!({ "keys": keys }),
            );
        }
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<(), SettingsServiceError> {
    let ok = !key.is_empty()
        && key.len() <= 100
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(SettingsServiceError::InvalidKey(key.to_string()))
    }
}
