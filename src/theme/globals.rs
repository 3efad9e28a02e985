//! Template globals
//!
//! An in-memory snapshot of site settings and navigation pages. Services
//! republish it after writes; templates read it through the `get_setting`
//! and `get_pages` Tera functions without touching the database.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::{NavPage, SettingValue};

#[derive(Debug, Default)]
pub struct TemplateGlobals {
    settings: RwLock<HashMap<String, SettingValue>>,
    pages: RwLock<Vec<NavPage>>,
}

impl TemplateGlobals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the settings snapshot
    pub fn publish_settings(&self, settings: HashMap<String, SettingValue>) {
        let mut guard = self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = settings;
    }

    /// Replace the navigation snapshot
    pub fn publish_pages(&self, pages: Vec<NavPage>) {
        let mut guard = self
            .pages
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = pages;
    }

    pub fn setting(&self, key: &str) -> Option<SettingValue> {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    /// Stored value as JSON, or `default` when the key is absent
    pub fn get_setting(&self, key: &str, default: Value) -> Value {
        self.setting(key).map(|v| v.to_json()).unwrap_or(default)
    }

    pub fn setting_str(&self, key: &str, default: &str) -> String {
        match self.setting(key) {
            Some(SettingValue::String(s)) => s,
            _ => default.to_string(),
        }
    }

    pub fn setting_bool(&self, key: &str, default: bool) -> bool {
        self.setting(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    pub fn pages(&self) -> Vec<NavPage> {
        self.pages
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// `get_setting(key="site_title", default="My Site")`
pub struct GetSettingFn(pub Arc<TemplateGlobals>);

impl tera::Function for GetSettingFn {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let key = args
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("get_setting requires a string `key` argument"))?;
        let default = args.get("default").cloned().unwrap_or(Value::Null);
        Ok(self.0.get_setting(key, default))
    }
}

/// `get_pages()`: published pages for navigation, ordered by title
pub struct GetPagesFn(pub Arc<TemplateGlobals>);

impl tera::Function for GetPagesFn {
    fn call(&self, _args: &HashMap<String, Value>) -> tera::Result<Value> {
        serde_json::to_value(self.0.pages()).map_err(|e| tera::Error::msg(e.to_string()))
    }
}
