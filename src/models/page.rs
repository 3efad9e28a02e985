//! Static page model
//!
//! Pages differ from posts in that they pick a layout variant. The variant
//! maps to a theme file: `default` renders `page.html`, anything else
//! renders `page-{name}.html`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Layout variant of a page
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageTemplate {
    #[default]
    Default,
    FullWidth,
    Sidebar,
    Landing,
    /// A variant shipped by the active theme only
    Custom(String),
}

impl PageTemplate {
    pub const BUILTIN: [&'static str; 4] = ["default", "full-width", "sidebar", "landing"];

    pub fn as_str(&self) -> &str {
        match self {
            PageTemplate::Default => "default",
            PageTemplate::FullWidth => "full-width",
            PageTemplate::Sidebar => "sidebar",
            PageTemplate::Landing => "landing",
            PageTemplate::Custom(name) => name,
        }
    }

    /// Theme file this variant renders with
    pub fn template_file(&self) -> String {
        match self {
            PageTemplate::Default => "page.html".to_string(),
            other => format!("page-{}.html", other.as_str()),
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, PageTemplate::Custom(_))
    }
}

impl fmt::Display for PageTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageTemplate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        match name.as_str() {
            "" | "default" => Ok(PageTemplate::Default),
            "full-width" => Ok(PageTemplate::FullWidth),
            "sidebar" => Ok(PageTemplate::Sidebar),
            "landing" => Ok(PageTemplate::Landing),
            _ if is_valid_variant_name(&name) => Ok(PageTemplate::Custom(name)),
            _ => Err(anyhow::anyhow!("Invalid page template: {}", s)),
        }
    }
}

impl From<PageTemplate> for String {
    fn from(t: PageTemplate) -> Self {
        t.as_str().to_string()
    }
}

impl TryFrom<String> for PageTemplate {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl Serialize for PageTemplate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PageTemplate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Variant names end up in file names, so keep them to `[a-z0-9-]`
pub fn is_valid_variant_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub template: PageTemplate,
    pub published: bool,
    pub author_id: i64,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Navigation entry exposed to templates through `get_pages()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavPage {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub url: String,
}

impl From<&Page> for NavPage {
    fn from(page: &Page) -> Self {
        Self {
            id: page.id,
            title: page.title.clone(),
            slug: page.slug.clone(),
            url: format!("/page/{}", page.slug),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatePageInput {
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub template: PageTemplate,
    #[serde(default)]
    pub published: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePageInput {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub template: Option<PageTemplate>,
    pub published: Option<bool>,
}
