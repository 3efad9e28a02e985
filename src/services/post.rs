//! Post service
//!
//! CRUD with slug and excerpt derivation, visitor likes, and cache
//! invalidation of everything derived from the post list (search results
//! and feeds).

use anyhow::Context;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::PostRepository;
use crate::models::{CreatePostInput, ListParams, PagedResult, Post, UpdatePostInput};
use crate::plugin::{hook_names, HookManager};
use crate::services::text::{generate_slug, make_excerpt};

pub const EXCERPT_LENGTH: usize = 150;
pub const TITLE_MAX_LENGTH: usize = 200;

/// Cache prefixes dropped on every post write
const DERIVED_CACHE_PATTERNS: [&str; 2] = ["search:*", "feed:*"];

#[derive(Debug, thiserror::Error)]
pub enum PostServiceError {
    #[error("Post not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Post slug already exists: {0}")]
    DuplicateSlug(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct PostService {
    repo: Arc<dyn PostRepository>,
    cache: Arc<Cache>,
    hooks: Option<Arc<HookManager>>,
}

impl PostService {
    pub fn new(repo: Arc<dyn PostRepository>, cache: Arc<Cache>) -> Self {
        Self {
            repo,
            cache,
            hooks: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookManager>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    fn trigger_hook(&self, name: &str, data: serde_json::Value) {
        if let Some(hooks) = &self.hooks {
            hooks.trigger(name, data);
        }
    }

    async fn invalidate_derived(&self) {
        for pattern in DERIVED_CACHE_PATTERNS {
            if let Err(e) = self.cache.delete_pattern(pattern).await {
                warn!("Failed to invalidate cache '{}': {}", pattern, e);
            }
        }
    }

    async fn unique_slug(&self, requested: Option<&str>, title: &str, exclude_id: Option<i64>) -> Result<String, PostServiceError> {
        let explicit = requested.map(str::trim).filter(|s| !s.is_empty());
        let slug = generate_slug(explicit.unwrap_or(title));
        if slug.is_empty() {
            let source = if explicit.is_some() { "slug" } else { "title" };
            return Err(PostServiceError::ValidationError(format!(
                "Could not derive a slug from the {}",
                source
            )));
        }
        if explicit.is_some() {
            if self.repo.slug_exists(&slug, exclude_id).await? {
                return Err(PostServiceError::DuplicateSlug(slug));
            }
            return Ok(slug);
        }

        // Derived slugs get a numeric suffix instead of failing
        let mut candidate = slug.clone();
        let mut n = 2;
        while self.repo.slug_exists(&candidate, exclude_id).await? {
            candidate = format!("{}-{}", slug, n);
            n += 1;
        }
        Ok(candidate)
    }

    pub async fn create(&self, author_id: i64, input: CreatePostInput) -> Result<Post, PostServiceError> {
        let title = validate_title(&input.title)?;
        let slug = self.unique_slug(input.slug.as_deref(), &title, None).await?;
        let excerpt = match input.excerpt.filter(|e| !e.trim().is_empty()) {
            Some(e) => Some(e),
            None if !input.content.trim().is_empty() => {
                Some(make_excerpt(&input.content, EXCERPT_LENGTH))
            }
            None => None,
        };

        let now = Utc::now();
        let post = Post {
            id: 0,
            title,
            slug,
            content: input.content,
            excerpt,
            featured_image: input.featured_image.filter(|s| !s.trim().is_empty()),
            published: input.published,
            likes: 0,
            author_id,
            author_name: String::new(),
            created_at: now,
            updated_at: now,
        };
        let post = self.repo.create(&post).await.context("Failed to create post")?;
        debug!("Created post {} '{}'", post.id, post.slug);

        self.invalidate_derived().await;
        self.trigger_hook(
            hook_names::POST_CREATED,
            json!({ "id": post.id, "slug": post.slug, "published": post.published }),
        );
        Ok(post)
    }

    pub async fn update(&self, id: i64, input: UpdatePostInput) -> Result<Post, PostServiceError> {
        let mut post = self.require(id).await?;
        if !input.has_changes() {
            return Ok(post);
        }

        if let Some(title) = input.title {
            post.title = validate_title(&title)?;
        }
        if let Some(slug) = input.slug {
            let slug = slug.trim();
            if !slug.is_empty() && slug != post.slug {
                post.slug = self.unique_slug(Some(slug), &post.title, Some(id)).await?;
            }
        }
        if let Some(content) = input.content {
            post.content = content;
        }
        if let Some(excerpt) = input.excerpt {
            post.excerpt = if excerpt.trim().is_empty() {
                Some(make_excerpt(&post.content, EXCERPT_LENGTH)).filter(|e| !e.is_empty())
            } else {
                Some(excerpt)
            };
        }
        if let Some(image) = input.featured_image {
            post.featured_image = Some(image).filter(|s| !s.trim().is_empty());
        }
        if let Some(published) = input.published {
            post.published = published;
        }
        post.updated_at = Utc::now();

        let post = self.repo.update(&post).await.context("Failed to update post")?;
        self.invalidate_derived().await;
        self.trigger_hook(
            hook_names::POST_UPDATED,
            json!({ "id": post.id, "slug": post.slug, "published": post.published }),
        );
        Ok(post)
    }

    pub async fn delete(&self, id: i64) -> Result<(), PostServiceError> {
        if !self.repo.delete(id).await? {
            return Err(PostServiceError::NotFound(id.to_string()));
        }
        self.invalidate_derived().await;
        self.trigger_hook(hook_names::POST_DELETED, json!({ "id": id }));
        Ok(())
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Post>, PostServiceError> {
        Ok(self.repo.get_by_id(id).await?)
    }

    async fn require(&self, id: i64) -> Result<Post, PostServiceError> {
        self.repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| PostServiceError::NotFound(id.to_string()))
    }

    /// Public lookup; drafts are invisible
    pub async fn get_published_by_slug(&self, slug: &str) -> Result<Option<Post>, PostServiceError> {
        Ok(self.repo.get_by_slug(slug).await?.filter(|p| p.published))
    }

    pub async fn list_published(&self, params: &ListParams) -> Result<PagedResult<Post>, PostServiceError> {
        let (posts, total) = self.repo.list(params, true).await?;
        Ok(PagedResult::new(posts, total, params))
    }

    /// Admin listing, drafts included
    pub async fn list_all(&self, params: &ListParams) -> Result<PagedResult<Post>, PostServiceError> {
        let (posts, total) = self.repo.list(params, false).await?;
        Ok(PagedResult::new(posts, total, params))
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<Post>, PostServiceError> {
        let params = ListParams::new(1, limit);
        Ok(self.repo.list(&params, true).await?.0)
    }

    pub async fn count(&self, published_only: bool) -> Result<i64, PostServiceError> {
        Ok(self.repo.count(published_only).await?)
    }

    /// Record one like per visitor fingerprint; returns the current count
    pub async fn like(&self, post_id: i64, fingerprint: &str) -> Result<i64, PostServiceError> {
        let post = self.require(post_id).await?;
        if !post.published {
            return Err(PostServiceError::NotFound(post_id.to_string()));
        }
        self.repo
            .like(post_id, fingerprint)
            .await?
            .ok_or_else(|| PostServiceError::NotFound(post_id.to_string()))
    }

    /// Delete drafts untouched for `days` days
    pub async fn cleanup_old_drafts(&self, days: i64) -> Result<u64, PostServiceError> {
        let removed = self
            .repo
            .delete_drafts_before(Utc::now() - chrono::Duration::days(days))
            .await?;
        if removed > 0 {
            self.invalidate_derived().await;
        }
        Ok(removed)
    }

    pub async fn references(&self, needle: &str) -> Result<bool, PostServiceError> {
        Ok(self.repo.references(needle).await?)
    }
}

fn validate_title(title: &str) -> Result<String, PostServiceError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(PostServiceError::ValidationError("Title is required".to_string()));
    }
    if title.chars().count() > TITLE_MAX_LENGTH {
        return Err(PostServiceError::ValidationError(format!(
            "Title must be at most {} characters",
            TITLE_MAX_LENGTH
        )));
    }
    Ok(title.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::create_cache;
    use crate::config::CacheConfig;
    use crate::db::repositories::{SqlxPostRepository, SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::User;
    use std::time::Duration;

    async fn setup() -> (PostService, Arc<Cache>, i64) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let author = SqlxUserRepository::new(pool.clone())
            .create(&User::new("author".into(), "a@example.com".into(), "hash".into(), true))
            .await
            .unwrap();
        let cache = create_cache(&CacheConfig::default()).await.unwrap();
        let service = PostService::new(SqlxPostRepository::boxed(pool), cache.clone());
        (service, cache, author.id)
    }

    fn input(title: &str, published: bool) -> CreatePostInput {
        CreatePostInput {
            title: title.to_string(),
            content: "Some **markdown** body".to_string(),
            published,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_derives_slug_and_excerpt() {
        let (service, _, author) = setup().await;
        let post = service.create(author, input("Hello World", true)).await.unwrap();
        assert_eq!(post.slug, "hello-world");
        assert_eq!(post.excerpt.as_deref(), Some("Some **markdown** body"));
        assert_eq!(post.author_name, "author");

        let second = service.create(author, input("Hello World", true)).await.unwrap();
        assert_eq!(second.slug, "hello-world-2");
    }

    #[tokio::test]
    async fn test_explicit_duplicate_slug_rejected() {
        let (service, _, author) = setup().await;
        service.create(author, input("First", true)).await.unwrap();
        let mut dup = input("Second", true);
        dup.slug = Some("first".into());
        assert!(matches!(
            service.create(author, dup).await,
            Err(PostServiceError::DuplicateSlug(_))
        ));
    }

    #[tokio::test]
    async fn test_punctuation_only_slug_rejected() {
        let (service, _, author) = setup().await;
        let mut bad = input("Valid Title", true);
        bad.slug = Some("!!!".into());
        assert!(matches!(
            service.create(author, bad).await,
            Err(PostServiceError::ValidationError(_))
        ));

        let post = service.create(author, input("Keeps Slug", true)).await.unwrap();
        let renamed = UpdatePostInput {
            slug: Some("?!".into()),
            ..Default::default()
        };
        assert!(matches!(
            service.update(post.id, renamed).await,
            Err(PostServiceError::ValidationError(_))
        ));
        let stored = service.get_by_id(post.id).await.unwrap().unwrap();
        assert_eq!(stored.slug, "keeps-slug");
    }

    #[tokio::test]
    async fn test_empty_title_rejected() {
        let (service, _, author) = setup().await;
        assert!(matches!(
            service.create(author, input("   ", true)).await,
            Err(PostServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_drafts_hidden_from_public() {
        let (service, _, author) = setup().await;
        service.create(author, input("Draft", false)).await.unwrap();
        service.create(author, input("Live", true)).await.unwrap();

        assert!(service.get_published_by_slug("draft").await.unwrap().is_none());
        assert!(service.get_published_by_slug("live").await.unwrap().is_some());

        let public = service.list_published(&ListParams::default()).await.unwrap();
        assert_eq!(public.total, 1);
        let all = service.list_all(&ListParams::default()).await.unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(service.recent(5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_like_is_once_per_fingerprint() {
        let (service, _, author) = setup().await;
        let post = service.create(author, input("Likeable", true)).await.unwrap();
        assert_eq!(service.like(post.id, "fp-a").await.unwrap(), 1);
        assert_eq!(service.like(post.id, "fp-a").await.unwrap(), 1);
        assert_eq!(service.like(post.id, "fp-b").await.unwrap(), 2);

        let draft = service.create(author, input("Hidden", false)).await.unwrap();
        assert!(matches!(
            service.like(draft.id, "fp-a").await,
            Err(PostServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.like(9999, "fp-a").await,
            Err(PostServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_invalidate_search_and_feed_cache() {
        let (service, cache, author) = setup().await;
        let ttl = Duration::from_secs(60);
        cache.set("search:abc", &"cached", ttl).await.unwrap();
        cache.set("feed:rss", &"cached", ttl).await.unwrap();
        cache.set("other:key", &"kept", ttl).await.unwrap();

        let post = service.create(author, input("Fresh", true)).await.unwrap();
        assert!(cache.get::<String>("search:abc").await.unwrap().is_none());
        assert!(cache.get::<String>("feed:rss").await.unwrap().is_none());
        assert_eq!(cache.get::<String>("other:key").await.unwrap().as_deref(), Some("kept"));

        cache.set("feed:rss", &"cached", ttl).await.unwrap();
        service.delete(post.id).await.unwrap();
        assert!(cache.get::<String>("feed:rss").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_fields() {
        let (service, _, author) = setup().await;
        let post = service.create(author, input("Original", false)).await.unwrap();
        let updated = service
            .update(
                post.id,
                UpdatePostInput {
                    title: Some("Renamed".into()),
                    slug: Some("renamed".into()),
                    published: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.slug, "renamed");
        assert!(updated.published);

        assert!(matches!(
            service.update(404, UpdatePostInput::default()).await,
            Err(PostServiceError::NotFound(_))
        ));
        assert!(matches!(service.delete(404).await, Err(PostServiceError::NotFound(_))));
    }
}
