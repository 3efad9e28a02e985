//! Plugin registry
//!
//! A plugin is a directory under the plugin path with a `plugin.json`
//! manifest. Activating a plugin subscribes it to the hook points named in
//! its manifest; deactivating drops every handler it registered.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::repositories::PluginRepository;
use crate::models::{Plugin, PluginManifest};
use crate::plugin::{hook_names, HookManager, PRIORITY_DEFAULT};
use crate::services::theme::{copy_dir_all, is_valid_directory};

pub const PLUGIN_MANIFEST: &str = "plugin.json";

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Invalid plugin: {0}")]
    InvalidManifest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub fn read_plugin_manifest(dir: &Path) -> Result<PluginManifest, PluginError> {
    let path = dir.join(PLUGIN_MANIFEST);
    let content = fs::read_to_string(&path)
        .map_err(|e| PluginError::InvalidManifest(format!("{}: {}", path.display(), e)))?;
    let manifest: PluginManifest = serde_json::from_str(&content)
        .map_err(|e| PluginError::InvalidManifest(format!("{}: {}", path.display(), e)))?;
    if manifest.name.trim().is_empty() {
        return Err(PluginError::InvalidManifest(format!(
            "{}: name must not be empty",
            path.display()
        )));
    }
    Ok(manifest)
}

pub struct PluginService {
    repo: Arc<dyn PluginRepository>,
    hooks: Arc<HookManager>,
    plugin_path: PathBuf,
}

impl PluginService {
    pub fn new(repo: Arc<dyn PluginRepository>, hooks: Arc<HookManager>, plugin_path: PathBuf) -> Self {
        Self {
            repo,
            hooks,
            plugin_path,
        }
    }

    pub fn plugin_path(&self) -> &Path {
        &self.plugin_path
    }

    /// Register every directory with a valid `plugin.json`
    pub async fn scan(&self) -> Result<Vec<Plugin>, PluginError> {
        fs::create_dir_all(&self.plugin_path)?;
        let mut directories: Vec<String> = fs::read_dir(&self.plugin_path)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        directories.sort();

        let mut registered = Vec::new();
        for directory in directories {
            match self.install(&directory).await {
                Ok(plugin) => registered.push(plugin),
                Err(e) => warn!("Skipping plugin directory '{}': {}", directory, e),
            }
        }
        info!("Plugin scan registered {} plugins", registered.len());
        Ok(registered)
    }

    /// Register (or refresh) `{plugins}/{directory}`
    pub async fn install(&self, directory: &str) -> Result<Plugin, PluginError> {
        if !is_valid_directory(directory) {
            return Err(PluginError::InvalidManifest(format!(
                "invalid plugin directory name: {}",
                directory
            )));
        }
        let dir = self.plugin_path.join(directory);
        if !dir.is_dir() {
            return Err(PluginError::NotFound(directory.to_string()));
        }
        let manifest = read_plugin_manifest(&dir)?;
        let plugin = self.repo.upsert(directory, &manifest).await?;
        info!("Registered plugin '{}' ({})", plugin.name, directory);

        // Manifest changes take effect for an already active plugin
        if plugin.active {
            self.subscribe(&plugin, &manifest);
        }
        Ok(plugin)
    }

    /// Copy a plugin directory into the plugin path and register it
    pub async fn install_from_path(&self, source: &Path) -> Result<Plugin, PluginError> {
        let directory = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PluginError::NotFound(source.display().to_string()))?;
        if !source.is_dir() {
            return Err(PluginError::NotFound(source.display().to_string()));
        }
        read_plugin_manifest(source)?;

        let target = self.plugin_path.join(&directory);
        let same = match (source.canonicalize(), target.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !same {
            if target.exists() {
                fs::remove_dir_all(&target)?;
            }
            copy_dir_all(source, &target)?;
        }
        self.install(&directory).await
    }

    /// Deactivate, remove the files and forget the plugin
    pub async fn uninstall(&self, directory: &str) -> Result<(), PluginError> {
        let plugin = self
            .repo
            .get_by_directory(directory)
            .await?
            .ok_or_else(|| PluginError::NotFound(directory.to_string()))?;

        if plugin.active {
            self.deactivate(plugin.id).await?;
        }
        let dir = self.plugin_path.join(&plugin.directory);
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
        }
        self.repo.delete(plugin.id).await?;
        info!("Uninstalled plugin '{}'", directory);
        Ok(())
    }

    pub async fn activate(&self, id: i64) -> Result<Plugin, PluginError> {
        let plugin = self.get(id).await?;
        let manifest = read_plugin_manifest(&self.plugin_path.join(&plugin.directory))?;
        self.repo.set_active(id, true).await?;
        self.subscribe(&plugin, &manifest);
        info!("Activated plugin '{}'", plugin.directory);
        Ok(Plugin {
            active: true,
            ..plugin
        })
    }

    pub async fn deactivate(&self, id: i64) -> Result<Plugin, PluginError> {
        let plugin = self.get(id).await?;
        self.repo.set_active(id, false).await?;
        self.hooks.unregister_plugin(&plugin.directory);
        info!("Deactivated plugin '{}'", plugin.directory);
        Ok(Plugin {
            active: false,
            ..plugin
        })
    }

    pub async fn toggle(&self, id: i64) -> Result<Plugin, PluginError> {
        if self.get(id).await?.active {
            self.deactivate(id).await
        } else {
            self.activate(id).await
        }
    }

    pub async fn list(&self) -> Result<Vec<Plugin>, PluginError> {
        Ok(self.repo.list().await?)
    }

    /// Subscribe every active plugin; run once at startup
    pub async fn load_active(&self) -> Result<usize, PluginError> {
        let mut loaded = 0;
        for plugin in self.repo.list().await?.into_iter().filter(|p| p.active) {
            match read_plugin_manifest(&self.plugin_path.join(&plugin.directory)) {
                Ok(manifest) => {
                    self.subscribe(&plugin, &manifest);
                    loaded += 1;
                }
                Err(e) => warn!("Active plugin '{}' failed to load: {}", plugin.directory, e),
            }
        }
        Ok(loaded)
    }

    async fn get(&self, id: i64) -> Result<Plugin, PluginError> {
        self.repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| PluginError::NotFound(id.to_string()))
    }

    fn subscribe(&self, plugin: &Plugin, manifest: &PluginManifest) {
        self.hooks.unregister_plugin(&plugin.directory);
        for hook in &manifest.hooks {
            if !hook_names::ALL.contains(&hook.as_str()) {
                warn!("Plugin '{}' subscribes to unknown hook '{}'", plugin.directory, hook);
            }
            let name = plugin.directory.clone();
            let hook_name = hook.clone();
            self.hooks.register(
                hook,
                move |data: &Value| {
                    debug!("Plugin '{}' received '{}': {}", name, hook_name, data);
                    Ok(None)
                },
                PRIORITY_DEFAULT,
                Some(plugin.directory.clone()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxPluginRepository;
    use crate::db::{create_test_pool, migrations};
    use tempfile::TempDir;

    fn write_plugin(root: &Path, directory: &str, hooks: &[&str]) {
        let dir = root.join(directory);
        fs::create_dir_all(&dir).unwrap();
        let manifest = serde_json::json!({
            "name": format!("{} plugin", directory),
            "version": "1.2.0",
            "hooks": hooks,
        });
        fs::write(dir.join(PLUGIN_MANIFEST), manifest.to_string()).unwrap();
    }

    async fn setup(root: &Path) -> (PluginService, Arc<HookManager>) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let hooks = Arc::new(HookManager::new());
        let service = PluginService::new(
            SqlxPluginRepository::boxed(pool),
            hooks.clone(),
            root.to_path_buf(),
        );
        (service, hooks)
    }

    #[tokio::test]
    async fn test_scan_and_toggle() {
        let dir = TempDir::new().unwrap();
        write_plugin(dir.path(), "seo", &["post_created", "page_saved"]);
        write_plugin(dir.path(), "stats", &["post_updated"]);
        fs::create_dir_all(dir.path().join("junk")).unwrap();
        let (service, hooks) = setup(dir.path()).await;

        let plugins = service.scan().await.unwrap();
        assert_eq!(plugins.len(), 2);
        assert!(plugins.iter().all(|p| !p.active));

        let seo = plugins.iter().find(|p| p.directory == "seo").unwrap();
        let toggled = service.toggle(seo.id).await.unwrap();
        assert!(toggled.active);
        assert!(hooks.has_handlers("post_created"));
        assert!(hooks.has_handlers("page_saved"));
        assert!(!hooks.has_handlers("post_updated"));

        let toggled = service.toggle(seo.id).await.unwrap();
        assert!(!toggled.active);
        assert!(!hooks.has_handlers("post_created"));
    }

    #[tokio::test]
    async fn test_install_requires_manifest() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        let (service, _) = setup(dir.path()).await;

        assert!(matches!(
            service.install("empty").await,
            Err(PluginError::InvalidManifest(_))
        ));
        assert!(matches!(
            service.install("absent").await,
            Err(PluginError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_uninstall_removes_everything() {
        let dir = TempDir::new().unwrap();
        write_plugin(dir.path(), "seo", &["post_created"]);
        let (service, hooks) = setup(dir.path()).await;

        let plugin = service.install("seo").await.unwrap();
        service.activate(plugin.id).await.unwrap();
        assert!(hooks.has_handlers("post_created"));

        service.uninstall("seo").await.unwrap();
        assert!(!hooks.has_handlers("post_created"));
        assert!(!dir.path().join("seo").exists());
        assert!(service.list().await.unwrap().is_empty());
        assert!(matches!(
            service.uninstall("seo").await,
            Err(PluginError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_load_active_resubscribes() {
        let dir = TempDir::new().unwrap();
        write_plugin(dir.path(), "seo", &["comment_created"]);
        let (service, hooks) = setup(dir.path()).await;

        let plugin = service.install("seo").await.unwrap();
        service.activate(plugin.id).await.unwrap();
        hooks.unregister_plugin("seo");
        assert!(!hooks.has_handlers("comment_created"));

        assert_eq!(service.load_active().await.unwrap(), 1);
        assert!(hooks.has_handlers("comment_created"));
    }
}
