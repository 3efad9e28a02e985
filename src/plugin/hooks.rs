//! Backend hook system
//!
//! Plugins attach handlers to named hook points. A handler receives the
//! hook payload and may return a replacement value.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

pub type HookCallback = Arc<dyn Fn(&Value) -> anyhow::Result<Option<Value>> + Send + Sync>;

/// Lower runs earlier
pub const PRIORITY_EARLY: i32 = -100;
pub const PRIORITY_DEFAULT: i32 = 0;
pub const PRIORITY_LATE: i32 = 100;

struct HookHandler {
    callback: HookCallback,
    priority: i32,
    plugin_id: Option<String>,
}

#[derive(Default)]
pub struct HookManager {
    hooks: RwLock<HashMap<String, Vec<HookHandler>>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<HookHandler>>> {
        self.hooks.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<HookHandler>>> {
        self.hooks.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a handler. Handlers with equal priority run in registration order.
    pub fn register<F>(&self, name: &str, callback: F, priority: i32, plugin_id: Option<String>)
    where
        F: Fn(&Value) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        let mut hooks = self.write();
        let handlers = hooks.entry(name.to_string()).or_default();
        handlers.push(HookHandler {
            callback: Arc::new(callback),
            priority,
            plugin_id,
        });
        handlers.sort_by_key(|h| h.priority);
        debug!("Registered hook handler for '{}' with priority {}", name, priority);
    }

    /// Drop every handler a plugin registered
    pub fn unregister_plugin(&self, plugin_id: &str) {
        let mut hooks = self.write();
        for handlers in hooks.values_mut() {
            handlers.retain(|h| h.plugin_id.as_deref() != Some(plugin_id));
        }
        hooks.retain(|_, handlers| !handlers.is_empty());
    }

    fn snapshot(&self, name: &str) -> Vec<(HookCallback, Option<String>)> {
        self.read()
            .get(name)
            .map(|handlers| {
                handlers
                    .iter()
                    .map(|h| (h.callback.clone(), h.plugin_id.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pass `data` through each handler in turn; a handler returning a value
    /// replaces the payload for the next one.
    pub fn trigger(&self, name: &str, data: Value) -> Value {
        let mut data = data;
        for (callback, plugin_id) in self.snapshot(name) {
            match callback(&data) {
                Ok(Some(next)) => data = next,
                Ok(None) => {}
                Err(e) => warn!(
                    "Hook '{}' handler from {:?} failed: {}",
                    name, plugin_id, e
                ),
            }
        }
        data
    }

    /// Run every handler on the same payload and collect non-null results
    pub fn execute(&self, name: &str, data: &Value) -> Vec<Value> {
        let mut results = Vec::new();
        for (callback, plugin_id) in self.snapshot(name) {
            match callback(data) {
                Ok(Some(value)) if !value.is_null() => results.push(value),
                Ok(_) => {}
                Err(e) => warn!(
                    "Hook '{}' handler from {:?} failed: {}",
                    name, plugin_id, e
                ),
            }
        }
        results
    }

    pub fn has_handlers(&self, name: &str) -> bool {
        self.read().get(name).is_some_and(|h| !h.is_empty())
    }

    /// Names of hooks with at least one handler
    pub fn hook_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Hook points fired by the core
pub mod hook_names {
    pub const POST_CREATED: &str = "post_created";
    pub const POST_UPDATED: &str = "post_updated";
    pub const POST_DELETED: &str = "post_deleted";
    pub const PAGE_SAVED: &str = "page_saved";
    pub const COMMENT_CREATED: &str = "comment_created";
    pub const COMMENT_APPROVED: &str = "comment_approved";
    pub const USER_REGISTERED: &str = "user_registered";
    pub const SETTINGS_UPDATED: &str = "settings_updated";

    pub const ALL: [&str; 8] = [
        POST_CREATED,
        POST_UPDATED,
        POST_DELETED,
        PAGE_SAVED,
        COMMENT_CREATED,
        COMMENT_APPROVED,
        USER_REGISTERED,
        SETTINGS_UPDATED,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trigger_chains_in_priority_order() {
        let manager = HookManager::new();
        manager.register(
            "chain",
            |data| {
                let mut arr = data.as_array().cloned().unwrap_or_default();
                arr.push(json!("late"));
                Ok(Some(Value::Array(arr)))
            },
            PRIORITY_LATE,
            None,
        );
        manager.register(
            "chain",
            |data| {
                let mut arr = data.as_array().cloned().unwrap_or_default();
                arr.push(json!("early"));
                Ok(Some(Value::Array(arr)))
            },
            PRIORITY_EARLY,
            None,
        );
        manager.register("chain", |_| Ok(None), PRIORITY_DEFAULT, None);

        let out = manager.trigger("chain", json!([]));
        assert_eq!(out, json!(["early", "late"]));
    }

    #[test]
    fn test_failing_handler_is_skipped() {
        let manager = HookManager::new();
        manager.register("h", |_| anyhow::bail!("boom"), PRIORITY_EARLY, None);
        manager.register("h", |_| Ok(Some(json!(1))), PRIORITY_DEFAULT, None);
        manager.register("h", |_| Ok(Some(Value::Null)), PRIORITY_LATE, None);

        assert_eq!(manager.execute("h", &json!({})), vec![json!(1)]);
        assert_eq!(manager.trigger("h", json!(0)), Value::Null);
    }

    #[test]
    fn test_unregister_plugin() {
        let manager = HookManager::new();
        manager.register("a", |_| Ok(None), 0, Some("seo".into()));
        manager.register("b", |_| Ok(None), 0, Some("other".into()));
        assert!(manager.has_handlers("a"));

        manager.unregister_plugin("seo");
        assert!(!manager.has_handlers("a"));
        assert!(manager.has_handlers("b"));
        assert_eq!(manager.hook_names(), vec!["b".to_string()]);
    }

    #[test]
    fn test_unknown_hook_passes_data_through() {
        let manager = HookManager::new();
        assert_eq!(manager.trigger("none", json!({"x": 1})), json!({"x": 1}));
        assert!(manager.execute("none", &json!(null)).is_empty());
    }
}
