//! Theme registry
//!
//! Keeps the `themes` table in step with the theme directories on disk and
//! switches the engine when a theme is activated.

use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};
use tempfile::TempDir;
use tracing::{info, warn};
use zip::ZipArchive;

use crate::db::repositories::ThemeRepository;
use crate::models::Theme;
use crate::theme::{has_manifest, read_manifest, SharedThemeEngine, ThemeEngine, ThemeError, MANIFEST_FILE};

pub struct ThemeService {
    repo: Arc<dyn ThemeRepository>,
    engine: SharedThemeEngine,
    themes_path: PathBuf,
    max_archive_size: u64,
}

/// Theme and plugin directory names: lowercase letters, digits, `-` and `_`
pub fn is_valid_directory(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl ThemeService {
    pub fn new(
        repo: Arc<dyn ThemeRepository>,
        engine: SharedThemeEngine,
        max_archive_size: u64,
    ) -> Self {
        let themes_path = read_engine(&engine).themes_path().to_path_buf();
        Self {
            repo,
            engine,
            themes_path,
            max_archive_size,
        }
    }

    pub fn engine(&self) -> &SharedThemeEngine {
        &self.engine
    }

    pub fn themes_path(&self) -> &Path {
        &self.themes_path
    }

    /// Register every directory holding a valid `theme.json`
    pub async fn scan(&self) -> Result<Vec<Theme>, ThemeError> {
        let mut registered = Vec::new();
        let mut entries: Vec<String> = fs::read_dir(&self.themes_path)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();

        for directory in entries {
            match self.install(&directory).await {
                Ok(theme) => registered.push(theme),
                Err(e) => warn!("Skipping theme directory '{}': {}", directory, e),
            }
        }
        info!("Theme scan registered {} themes", registered.len());
        Ok(registered)
    }

    /// Register (or refresh) the theme in `{themes}/{directory}`
    pub async fn install(&self, directory: &str) -> Result<Theme, ThemeError> {
        if !is_valid_directory(directory) {
            return Err(ThemeError::InvalidMetadata(format!(
                "invalid theme directory name: {}",
                directory
            )));
        }
        let path = self.themes_path.join(directory);
        if !path.is_dir() {
            return Err(ThemeError::NotFound(directory.to_string()));
        }
        let manifest = read_manifest(&path)?;
        let theme = self.repo.upsert(directory, &manifest).await?;
        info!("Registered theme '{}' ({})", theme.name, directory);
        Ok(theme)
    }

    /// Copy a theme directory from anywhere on disk into the themes path,
    /// then register it
    pub async fn install_from_path(&self, source: &Path) -> Result<Theme, ThemeError> {
        let directory = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ThemeError::NotFound(source.display().to_string()))?;
        if !source.is_dir() {
            return Err(ThemeError::NotFound(source.display().to_string()));
        }
        read_manifest(source)?;

        let target = self.themes_path.join(&directory);
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
        let theme = self.install(&directory).await?;
        self.reload_if_current(&directory);
        Ok(theme)
    }

    /// Install a zip whose single top-level directory is the theme
    pub async fn install_archive(&self, data: &[u8]) -> Result<Theme, ThemeError> {
        if data.len() as u64 > self.max_archive_size {
            return Err(ThemeError::InvalidArchive(format!(
                "archive is {} bytes, limit is {}",
                data.len(),
                self.max_archive_size
            )));
        }

        let temp = TempDir::new()?;
        let directory = extract_zip(data, temp.path())?;
        let extracted = temp.path().join(&directory);
        read_manifest(&extracted)?;

        let target = self.themes_path.join(&directory);
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        copy_dir_all(&extracted, &target)?;

        let theme = self.install(&directory).await?;
        self.reload_if_current(&directory);
        Ok(theme)
    }

    /// Activate by numeric id or directory name
    pub async fn activate(&self, id_or_name: &str) -> Result<Theme, ThemeError> {
        let theme = match id_or_name.parse::<i64>() {
            Ok(id) => self.repo.get_by_id(id).await?,
            Err(_) => self.repo.get_by_directory(id_or_name).await?,
        }
        .ok_or_else(|| ThemeError::NotFound(id_or_name.to_string()))?;

        write_engine(&self.engine)
            .set_theme(&theme.directory)
            .map_err(|e| ThemeError::TemplateError(e.to_string()))?;
        self.repo.set_active(theme.id).await?;
        info!("Activated theme '{}'", theme.directory);

        Ok(Theme {
            active: true,
            ..theme
        })
    }

    pub async fn active(&self) -> Result<Option<Theme>, ThemeError> {
        Ok(self.repo.active().await?)
    }

    pub async fn list(&self) -> Result<Vec<Theme>, ThemeError> {
        Ok(self.repo.list().await?)
    }

    /// Point the engine at the theme marked active in the database, falling
    /// back to the default theme when it cannot be loaded
    pub async fn sync_engine(&self) -> Result<String, ThemeError> {
        let Some(active) = self.repo.active().await? else {
            return Ok(read_engine(&self.engine).current_theme().to_string());
        };
        let mut engine = write_engine(&self.engine);
        let result = engine.set_theme_with_fallback(&active.directory);
        if let Some(err) = result.error {
            warn!("Active theme '{}' unavailable: {}", active.directory, err);
        }
        Ok(engine.current_theme().to_string())
    }

    fn reload_if_current(&self, directory: &str) {
        let mut engine = write_engine(&self.engine);
        if engine.current_theme() == directory {
            if let Err(e) = engine.reload() {
                warn!("Failed to reload theme '{}': {}", directory, e);
            }
        }
    }
}

fn read_engine(engine: &SharedThemeEngine) -> RwLockReadGuard<'_, ThemeEngine> {
    engine.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_engine(engine: &SharedThemeEngine) -> RwLockWriteGuard<'_, ThemeEngine> {
    engine.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Extract into `dest`; returns the archive's top-level directory name
pub(crate) fn extract_zip(data: &[u8], dest: &Path) -> Result<String, ThemeError> {
    let mut archive = ZipArchive::new(Cursor::new(data))
        .map_err(|e| ThemeError::InvalidArchive(format!("not a zip file: {}", e)))?;

    let mut top_level: Option<String> = None;
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ThemeError::InvalidArchive(e.to_string()))?;
        let relative = file
            .enclosed_name()
            .ok_or_else(|| ThemeError::InvalidArchive(format!("unsafe path: {}", file.name())))?;

        let first = relative
            .components()
            .next()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .ok_or_else(|| ThemeError::InvalidArchive("empty entry name".to_string()))?;
        match &top_level {
            None => top_level = Some(first),
            Some(existing) if *existing != first => {
                return Err(ThemeError::InvalidArchive(
                    "archive must contain a single top-level directory".to_string(),
                ))
            }
            Some(_) => {}
        }

        let out = dest.join(&relative);
        if file.is_dir() {
            fs::create_dir_all(&out)?;
        } else {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut target = File::create(&out)?;
            io::copy(&mut file, &mut target)?;
        }
    }

    let directory =
        top_level.ok_or_else(|| ThemeError::InvalidArchive("empty archive".to_string()))?;
    if !is_valid_directory(&directory) || !dest.join(&directory).is_dir() {
        return Err(ThemeError::InvalidArchive(format!(
            "invalid top-level directory: {}",
            directory
        )));
    }
    if !has_manifest(&dest.join(&directory)) {
        return Err(ThemeError::InvalidMetadata(format!(
            "{}/{} is missing",
            directory, MANIFEST_FILE
        )));
    }
    Ok(directory)
}

pub(crate) fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxThemeRepository;
    use crate::db::{create_test_pool, migrations};
    use crate::services::markdown::MarkdownRenderer;
    use crate::theme::TemplateGlobals;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_theme(root: &Path, directory: &str, name: &str) {
        let dir = root.join(directory);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(MANIFEST_FILE),
            format!(r#"{{"name": "{}", "version": "0.2.0"}}"#, name),
        )
        .unwrap();
        fs::write(dir.join("index.html"), format!("{} home", name)).unwrap();
    }

    async fn setup(themes: &Path) -> ThemeService {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let engine = ThemeEngine::new(
            themes,
            "default",
            TemplateGlobals::new(),
            Arc::new(MarkdownRenderer::new()),
        )
        .unwrap()
        .shared();
        ThemeService::new(SqlxThemeRepository::boxed(pool), engine, 1024 * 1024)
    }

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_scan_registers_valid_themes() {
        let dir = TempDir::new().unwrap();
        write_theme(dir.path(), "clean", "Clean");
        fs::create_dir_all(dir.path().join("no-manifest")).unwrap();
        let service = setup(dir.path()).await;

        let themes = service.scan().await.unwrap();
        let dirs: Vec<&str> = themes.iter().map(|t| t.directory.as_str()).collect();
        assert_eq!(dirs, vec!["clean", "default"]);
        assert_eq!(themes[0].version, "0.2.0");

        // Rescanning updates rows in place
        assert_eq!(service.scan().await.unwrap().len(), 2);
        assert_eq!(service.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_install_requires_manifest() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("bare")).unwrap();
        let service = setup(dir.path()).await;

        assert!(matches!(
            service.install("bare").await,
            Err(ThemeError::InvalidMetadata(_))
        ));
        assert!(matches!(
            service.install("missing").await,
            Err(ThemeError::NotFound(_))
        ));
        assert!(service.install("../etc").await.is_err());
    }

    #[tokio::test]
    async fn test_activate_switches_engine() {
        let dir = TempDir::new().unwrap();
        write_theme(dir.path(), "clean", "Clean");
        let service = setup(dir.path()).await;
        service.scan().await.unwrap();

        let theme = service.activate("clean").await.unwrap();
        assert!(theme.active);
        assert_eq!(read_engine(service.engine()).current_theme(), "clean");
        assert_eq!(service.active().await.unwrap().unwrap().directory, "clean");

        let default = service.list().await.unwrap().into_iter().find(|t| t.directory == "default").unwrap();
        service.activate(&default.id.to_string()).await.unwrap();
        let active: Vec<Theme> = service
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].directory, "default");

        assert!(matches!(
            service.activate("ghost").await,
            Err(ThemeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_install_archive() {
        let dir = TempDir::new().unwrap();
        let service = setup(dir.path()).await;

        let data = zip_bytes(&[
            ("sunset/theme.json", r#"{"name": "Sunset"}"#),
            ("sunset/index.html", "sunset"),
            ("sunset/static/style.css", "body{}"),
        ]);
        let theme = service.install_archive(&data).await.unwrap();
        assert_eq!(theme.directory, "sunset");
        assert_eq!(theme.name, "Sunset");
        assert!(dir.path().join("sunset/static/style.css").exists());
    }

    #[tokio::test]
    async fn test_install_archive_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let service = setup(dir.path()).await;

        assert!(matches!(
            service.install_archive(b"not a zip").await,
            Err(ThemeError::InvalidArchive(_))
        ));

        let two_roots = zip_bytes(&[("a/theme.json", "{}"), ("b/theme.json", "{}")]);
        assert!(matches!(
            service.install_archive(&two_roots).await,
            Err(ThemeError::InvalidArchive(_))
        ));

        let no_manifest = zip_bytes(&[("plain/index.html", "x")]);
        assert!(matches!(
            service.install_archive(&no_manifest).await,
            Err(ThemeError::InvalidMetadata(_))
        ));

        let big = vec![0u8; 2 * 1024 * 1024];
        assert!(matches!(
            service.install_archive(&big).await,
            Err(ThemeError::InvalidArchive(_))
        ));
    }

    #[tokio::test]
    async fn test_install_from_path() {
        let themes = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        write_theme(outside.path(), "minimal", "Minimal");
        let service = setup(themes.path()).await;

        let theme = service
            .install_from_path(&outside.path().join("minimal"))
            .await
            .unwrap();
        assert_eq!(theme.name, "Minimal");
        assert!(themes.path().join("minimal").join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_valid_directory() {
        assert!(is_valid_directory("my-theme_2"));
        assert!(!is_valid_directory("My Theme"));
        assert!(!is_valid_directory(".."));
        assert!(!is_valid_directory(""));
    }
}
