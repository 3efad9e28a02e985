//! Page service
//!
//! Static pages with a layout variant. Every write republishes the
//! navigation snapshot that `get_pages()` serves to templates.

use anyhow::Context;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::db::repositories::PageRepository;
use crate::models::{is_valid_variant_name, CreatePageInput, NavPage, Page, UpdatePageInput};
use crate::plugin::{hook_names, HookManager};
use crate::services::post::TITLE_MAX_LENGTH;
use crate::services::text::{generate_slug, make_excerpt};
use crate::theme::TemplateGlobals;

#[derive(Debug, thiserror::Error)]
pub enum PageServiceError {
    #[error("Page not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Page slug already exists: {0}")]
    DuplicateSlug(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct PageService {
    repo: Arc<dyn PageRepository>,
    globals: Option<Arc<TemplateGlobals>>,
    hooks: Option<Arc<HookManager>>,
}

impl PageService {
    pub fn new(repo: Arc<dyn PageRepository>) -> Self {
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

    pub async fn create(&self, author_id: i64, input: CreatePageInput) -> Result<Page, PageServiceError> {
        let title = validate_title(&input.title)?;
        let slug = match input.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(explicit) => generate_slug(explicit),
            None => generate_slug(&title),
        };
        if slug.is_empty() {
            return Err(PageServiceError::ValidationError("Slug is required".to_string()));
        }
        if self.repo.slug_exists(&slug, None).await? {
            return Err(PageServiceError::DuplicateSlug(slug));
        }

        let now = Utc::now();
        let excerpt = input
            .excerpt
            .filter(|e| !e.trim().is_empty())
            .or_else(|| Some(make_excerpt(&input.content, 150)).filter(|e| !e.is_empty()));
        let page = Page {
            id: 0,
            title,
            slug,
            content: input.content,
            excerpt,
            template: input.template,
            published: input.published,
            author_id,
            author_name: String::new(),
            created_at: now,
            updated_at: now,
        };
        let page = self
            .repo
            .create(&page)
            .await
            .context("Failed to create page")?;
        debug!("Created page {} '{}' ({})", page.id, page.slug, page.template);
        self.after_write(&page).await?;
        Ok(page)
    }

    pub async fn update(&self, id: i64, input: UpdatePageInput) -> Result<Page, PageServiceError> {
        let mut page = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| PageServiceError::NotFound(id.to_string()))?;

        if let Some(title) = input.title {
            page.title = validate_title(&title)?;
        }
        if let Some(slug) = input.slug {
            let slug = generate_slug(&slug);
            if !slug.is_empty() && slug != page.slug {
                if self.repo.slug_exists(&slug, Some(id)).await? {
                    return Err(PageServiceError::DuplicateSlug(slug));
                }
                page.slug = slug;
            }
        }
        if let Some(content) = input.content {
            page.content = content;
        }
        if let Some(excerpt) = input.excerpt {
            page.excerpt = Some(excerpt).filter(|e| !e.trim().is_empty());
        }
        if let Some(template) = input.template {
            page.template = template;
        }
        if let Some(published) = input.published {
            page.published = published;
        }
        page.updated_at = Utc::now();

        let page = self.repo.update(&page).await.context("Failed to update page")?;
        self.after_write(&page).await?;
        Ok(page)
    }

    pub async fn delete(&self, id: i64) -> Result<(), PageServiceError> {
        if !self.repo.delete(id).await? {
            return Err(PageServiceError::NotFound(id.to_string()));
        }
        self.refresh_navigation().await?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Page>, PageServiceError> {
        Ok(self.repo.get_by_id(id).await?)
    }

    /// Lookup by slug. With `public` set, drafts are treated as missing.
    pub async fn get_by_slug(&self, slug: &str, public: bool) -> Result<Option<Page>, PageServiceError> {
        Ok(self
            .repo
            .get_by_slug(slug)
            .await?
            .filter(|p| p.published || !public))
    }

    /// Every page, ordered by title
    pub async fn list(&self) -> Result<Vec<Page>, PageServiceError> {
        Ok(self.repo.list(false).await?)
    }

    /// Published pages ordered by title; backs `get_pages()`
    pub async fn list_published(&self) -> Result<Vec<Page>, PageServiceError> {
        Ok(self.repo.list(true).await?)
    }

    pub async fn count(&self) -> Result<i64, PageServiceError> {
        Ok(self.repo.count().await?)
    }

    /// Reload the navigation snapshot from storage
    pub async fn refresh_navigation(&self) -> Result<(), PageServiceError> {
        if let Some(globals) = &self.globals {
            let pages = self.list_published().await?;
            globals.publish_pages(pages.iter().map(NavPage::from).collect());
        }
        Ok(())
    }

    async fn after_write(&self, page: &Page) -> Result<(), PageServiceError> {
        self.refresh_navigation().await?;
        if let Some(hooks) = &self.hooks {
            hooks.trigger(
                hook_names::PAGE_SAVED,
                json!({ "id": page.id, "slug": page.slug, "template": page.template }),
            );
        }
        Ok(())
    }
}

/// Layout choices for the page editor as `(value, label)` pairs.
///
/// `default` always comes first, followed by one entry per top-level
/// `page-*.html` template the theme ships, in name order. Files in
/// subdirectories and names a page could not store are skipped.
pub fn available_templates<I, S>(template_names: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut variants: Vec<String> = template_names
        .into_iter()
        .filter_map(|name| {
            name.as_ref()
                .strip_prefix("page-")
                .and_then(|rest| rest.strip_suffix(".html"))
                .filter(|v| *v != "default" && is_valid_variant_name(v))
                .map(str::to_string)
        })
        .collect();
    variants.sort();
    variants.dedup();

    let mut choices = vec![("default".to_string(), "Default Template".to_string())];
    choices.extend(variants.into_iter().map(|v| {
        let label = title_case(&v.replace('-', " "));
        (v, label)
    }));
    choices
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn validate_title(title: &str) -> Result<String, PageServiceError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(PageServiceError::ValidationError("Title is required".to_string()));
    }
    if title.chars().count() > TITLE_MAX_LENGTH {
        return Err(PageServiceError::ValidationError(format!(
            "Title must be at most {} characters",
            TITLE_MAX_LENGTH
        )));
    }
    Ok(title.to_string())
}
