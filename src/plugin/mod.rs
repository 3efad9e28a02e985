//! Plugin system
//!
//! Plugins are directories with a `plugin.json` manifest. Their handlers
//! attach to the core's hook points through [`HookManager`].

pub mod hooks;

pub use hooks::{hook_names, HookCallback, HookManager, PRIORITY_DEFAULT, PRIORITY_EARLY, PRIORITY_LATE};
