//! Theme engine
//!
//! Renders theme templates with Tera. A theme is a directory under the themes
//! path holding a `theme.json` manifest, its `*.html` templates (either at
//! the top level or under `templates/`) and an optional `static/` dir.
//!
//! The default theme is embedded in the binary and written to disk when its
//! directory is missing, so a fresh install always has something to render.

use anyhow::{Context, Result};
use chrono::Datelike;
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tera::{Context as TeraContext, Tera};
use tracing::{debug, error, info, warn};

use crate::models::ThemeManifest;
use crate::services::markdown::MarkdownRenderer;
use crate::services::text::escape_html;

mod error;
pub mod filters;
pub mod globals;

pub use error::{http_error_info, ThemeError};
pub use globals::{GetPagesFn, GetSettingFn, TemplateGlobals};

pub const MANIFEST_FILE: &str = "theme.json";
pub const TOML_MANIFEST_FILE: &str = "theme.toml";

#[derive(RustEmbed)]
#[folder = "themes/default/"]
struct EmbeddedDefaultTheme;

pub type SharedThemeEngine = Arc<RwLock<ThemeEngine>>;

/// Write the embedded default theme into `dir`; returns the files written
pub fn install_default_theme(dir: &Path) -> Result<usize> {
    let mut written = 0;
    for name in EmbeddedDefaultTheme::iter() {
        let Some(file) = EmbeddedDefaultTheme::get(&name) else {
            continue;
        };
        let target = dir.join(&*name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&target, file.data.as_ref())
            .with_context(|| format!("Failed to write {}", target.display()))?;
        written += 1;
    }
    info!("Installed default theme into {} ({} files)", dir.display(), written);
    Ok(written)
}

/// Parse `{dir}/theme.json`, or `{dir}/theme.toml` when there is no JSON manifest
pub fn read_manifest(dir: &Path) -> Result<ThemeManifest, ThemeError> {
    let json_path = dir.join(MANIFEST_FILE);
    let path = if json_path.is_file() {
        json_path
    } else {
        dir.join(TOML_MANIFEST_FILE)
    };
    let invalid = |e: &dyn std::fmt::Display| {
        ThemeError::InvalidMetadata(format!("{}: {}", path.display(), e))
    };

    let content = fs::read_to_string(&path).map_err(|e| invalid(&e))?;
    let manifest: ThemeManifest = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| invalid(&e))?
    } else {
        serde_json::from_str(&content).map_err(|e| invalid(&e))?
    };
    if manifest.name.trim().is_empty() {
        return Err(invalid(&"name must not be empty"));
    }
    Ok(manifest)
}

/// Whether `dir` carries either manifest format
pub fn has_manifest(dir: &Path) -> bool {
    dir.join(MANIFEST_FILE).is_file() || dir.join(TOML_MANIFEST_FILE).is_file()
}

/// A theme directory as found on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeInfo {
    /// Directory name; the identifier used for switching
    pub directory: String,
    #[serde(flatten)]
    pub manifest: ThemeManifest,
}

#[derive(Debug, Clone)]
pub struct ThemeSwitchResult {
    pub success: bool,
    pub used_fallback: bool,
    pub error: Option<String>,
}

pub struct ThemeEngine {
    tera: Tera,
    themes_path: PathBuf,
    current_theme: String,
    default_theme: String,
    globals: Arc<TemplateGlobals>,
    renderer: Arc<MarkdownRenderer>,
}

impl ThemeEngine {
    pub fn new(
        themes_path: &Path,
        default_theme: &str,
        globals: Arc<TemplateGlobals>,
        renderer: Arc<MarkdownRenderer>,
    ) -> Result<Self> {
        let themes_path = themes_path.to_path_buf();
        fs::create_dir_all(&themes_path)
            .with_context(|| format!("Failed to create themes directory: {:?}", themes_path))?;

        let default_dir = themes_path.join(default_theme);
        if !default_dir.exists() {
            install_default_theme(&default_dir)?;
        }

        let mut engine = Self {
            tera: Tera::default(),
            themes_path,
            current_theme: default_theme.to_string(),
            default_theme: default_theme.to_string(),
            globals,
            renderer,
        };
        engine.load_theme_templates(default_theme)?;
        Ok(engine)
    }

    pub fn shared(self) -> SharedThemeEngine {
        Arc::new(RwLock::new(self))
    }

    fn template_dir(&self, theme_name: &str) -> PathBuf {
        let root = self.themes_path.join(theme_name);
        let nested = root.join("templates");
        if nested.is_dir() {
            nested
        } else {
            root
        }
    }

    fn load_theme_templates(&mut self, theme_name: &str) -> Result<()> {
        let theme_path = self.themes_path.join(theme_name);
        if !theme_path.is_dir() {
            return Err(ThemeError::NotFound(theme_name.to_string()).into());
        }

        let template_path = self.template_dir(theme_name);
        let mut templates: Vec<(String, String)> = Vec::new();
        collect_templates(&template_path, &template_path, &mut templates)?;
        if templates.is_empty() {
            return Err(ThemeError::TemplateError(format!(
                "theme '{}' has no templates",
                theme_name
            ))
            .into());
        }

        let mut tera = Tera::default();
        filters::register_filters(&mut tera, self.renderer.clone());
        tera.register_function("get_setting", GetSettingFn(self.globals.clone()));
        tera.register_function("get_pages", GetPagesFn(self.globals.clone()));
        tera.register_function("meta_title", MetaTitleFn(self.globals.clone()));
        tera.add_raw_templates(templates).map_err(|e| {
            ThemeError::TemplateError(format!("theme '{}': {}", theme_name, error_chain(&e)))
        })?;

        self.tera = tera;
        debug!(
            "Loaded {} templates for theme '{}'",
            self.tera.get_template_names().count(),
            theme_name
        );
        Ok(())
    }

    pub fn render(&self, template: &str, context: &TeraContext) -> Result<String> {
        self.tera.render(template, context).map_err(|e| {
            ThemeError::TemplateError(format!(
                "Failed to render '{}': {}",
                template,
                error_chain(&e)
            ))
            .into()
        })
    }

    /// Render `template` when the theme has it, otherwise `fallback`
    pub fn render_or_fallback(
        &self,
        template: &str,
        fallback: &str,
        context: &TeraContext,
    ) -> Result<String> {
        if self.has_template(template) {
            return self.render(template, context);
        }
        debug!(
            "Theme '{}' has no {}, using {}",
            self.current_theme, template, fallback
        );
        self.render(fallback, context)
    }

    /// The theme's `error.html`, or a built-in page when that is missing or broken
    pub fn render_error(&self, code: u16, context: &TeraContext) -> String {
        let (name, description) = http_error_info(code);
        let mut ctx = context.clone();
        ctx.insert("code", &code);
        ctx.insert("name", name);
        ctx.insert("description", description);

        if self.has_template("error.html") {
            match self.render("error.html", &ctx) {
                Ok(html) => return html,
                Err(e) => error!("Error template failed: {}", e),
            }
        }
        simple_error_page(code, name, description)
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|t| t == name)
    }

    pub fn template_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tera.get_template_names().map(str::to_string).collect();
        names.sort();
        names
    }

    pub fn set_theme(&mut self, theme_name: &str) -> Result<()> {
        self.load_theme_templates(theme_name)?;
        if self.current_theme != theme_name {
            info!("Switched theme '{}' -> '{}'", self.current_theme, theme_name);
        }
        self.current_theme = theme_name.to_string();
        Ok(())
    }

    /// Switch themes; a theme that fails to load leaves the default active
    pub fn set_theme_with_fallback(&mut self, theme_name: &str) -> ThemeSwitchResult {
        match self.set_theme(theme_name) {
            Ok(()) => ThemeSwitchResult {
                success: true,
                used_fallback: false,
                error: None,
            },
            Err(e) if theme_name == self.default_theme => {
                error!("Failed to load default theme '{}': {}", theme_name, e);
                ThemeSwitchResult {
                    success: false,
                    used_fallback: false,
                    error: Some(e.to_string()),
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    "Theme '{}' not available ({}), falling back to '{}'",
                    theme_name, message, self.default_theme
                );
                let default = self.default_theme.clone();
                match self.set_theme(&default) {
                    Ok(()) => ThemeSwitchResult {
                        success: true,
                        used_fallback: true,
                        error: Some(message),
                    },
                    Err(fallback_err) => ThemeSwitchResult {
                        success: false,
                        used_fallback: true,
                        error: Some(format!("{}; fallback: {}", message, fallback_err)),
                    },
                }
            }
        }
    }

    /// Every directory with a readable manifest, by directory name
    pub fn list_themes(&self) -> Vec<ThemeInfo> {
        let Ok(entries) = fs::read_dir(&self.themes_path) else {
            return Vec::new();
        };
        let mut themes: Vec<ThemeInfo> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let directory = entry.file_name().to_string_lossy().into_owned();
                match self.theme_info(&directory) {
                    Ok(info) => Some(info),
                    Err(e) => {
                        warn!("Skipping theme '{}': {}", directory, e);
                        None
                    }
                }
            })
            .collect();
        themes.sort_by(|a, b| a.directory.cmp(&b.directory));
        themes
    }

    pub fn theme_info(&self, theme_name: &str) -> Result<ThemeInfo, ThemeError> {
        let dir = self.themes_path.join(theme_name);
        if !dir.is_dir() {
            return Err(ThemeError::NotFound(theme_name.to_string()));
        }
        Ok(ThemeInfo {
            directory: theme_name.to_string(),
            manifest: read_manifest(&dir)?,
        })
    }

    pub fn current_theme(&self) -> &str {
        &self.current_theme
    }

    pub fn default_theme(&self) -> &str {
        &self.default_theme
    }

    pub fn themes_path(&self) -> &Path {
        &self.themes_path
    }

    pub fn theme_path(&self, theme_name: &str) -> PathBuf {
        self.themes_path.join(theme_name)
    }

    /// Assets served under `/theme/`
    pub fn static_dir(&self) -> PathBuf {
        self.theme_path(&self.current_theme).join("static")
    }

    pub fn reload(&mut self) -> Result<()> {
        let current = self.current_theme.clone();
        self.load_theme_templates(&current)
    }
}

fn collect_templates(base: &Path, dir: &Path, out: &mut Vec<(String, String)>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))? {
        let path = entry?.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == "static") {
                continue;
            }
            collect_templates(base, &path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "html") {
            let name = path
                .strip_prefix(base)
                .map_err(|_| ThemeError::TemplateError("template outside theme".to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read template: {:?}", path))?;
            out.push((name, content));
        }
    }
    Ok(())
}

fn error_chain(e: &tera::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        message.push_str(&format!(": {}", s));
        source = s.source();
    }
    message
}

fn simple_error_page(code: u16, name: &str, description: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{code} {name}</title>
    <style>
        body {{ font-family: sans-serif; max-width: 600px; margin: 50px auto; color: #333; }}
        h1 {{ color: #c0392b; }}
    </style>
</head>
<body>
    <h1>{code} {name}</h1>
    <p>{description}</p>
    <p><a href="/">Back to home</a></p>
</body>
</html>"#,
        code = code,
        name = escape_html(name),
        description = escape_html(description)
    )
}

/// `meta_title(title="About")` gives "About - {site_title}", or just the site title
pub struct MetaTitleFn(pub Arc<TemplateGlobals>);

impl tera::Function for MetaTitleFn {
    fn call(&self, args: &HashMap<String, serde_json::Value>) -> tera::Result<serde_json::Value> {
        let site = self.0.setting_str("site_title", "Webbly Site");
        let title = args
            .get("title")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        Ok(serde_json::Value::String(meta_title(title, &site)))
    }
}

pub fn meta_title(title: &str, site_title: &str) -> String {
    if title.is_empty() {
        site_title.to_string()
    } else {
        format!("{} - {}", title, site_title)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub text: String,
    pub url: String,
}

/// Home, then one crumb per path segment with `-` read as a space
pub fn breadcrumbs(path: &str) -> Vec<Breadcrumb> {
    let mut crumbs = vec![Breadcrumb {
        text: "Home".to_string(),
        url: "/".to_string(),
    }];
    let mut url = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        url.push('/');
        url.push_str(part);
        let decoded = urlencoding::decode(part)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| part.to_string());
        crumbs.push(Breadcrumb {
            text: title_case(&decoded.replace('-', " ")),
            url: url.clone(),
        });
    }
    crumbs
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// The signed-in user as templates see it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
}

/// Variables every page template receives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteContext {
    pub site_name: String,
    pub site_description: String,
    pub current_user: Option<CurrentUser>,
    pub request_path: String,
    pub csrf_token: Option<String>,
    pub year: i32,
}

impl SiteContext {
    pub fn new(globals: &TemplateGlobals, request_path: impl Into<String>) -> Self {
        Self {
            site_name: globals.setting_str("site_title", "Webbly Site"),
            site_description: globals.setting_str("site_description", ""),
            current_user: None,
            request_path: request_path.into(),
            csrf_token: None,
            year: chrono::Utc::now().year(),
        }
    }

    pub fn with_user(mut self, user: Option<CurrentUser>) -> Self {
        self.current_user = user;
        self
    }

    pub fn with_csrf(mut self, token: String) -> Self {
        self.csrf_token = Some(token);
        self
    }

    pub fn is_admin(&self) -> bool {
        self.current_user.as_ref().is_some_and(|u| u.is_admin)
    }

    pub fn to_context(&self) -> TeraContext {
        let mut ctx = TeraContext::new();
        ctx.insert("site_name", &self.site_name);
        ctx.insert("site_description", &self.site_description);
        ctx.insert("current_user", &self.current_user);
        ctx.insert("is_admin", &self.is_admin());
        ctx.insert("request_path", &self.request_path);
        ctx.insert("csrf_token", &self.csrf_token.clone().unwrap_or_default());
        ctx.insert("year", &self.year);
        ctx.insert("breadcrumbs", &breadcrumbs(&self.request_path));
        ctx
    }
}
