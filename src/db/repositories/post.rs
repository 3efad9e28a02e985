//! Post repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

use crate::config::DatabaseDriver;
use crate::db::{DynDatabasePool, InsertId};
use crate::models::{ListParams, Post};
use crate::with_pool;

const POST_COLUMNS: &str = "p.id, p.title, p.slug, p.content, p.excerpt, p.featured_image, \
     p.published, p.likes, p.author_id, COALESCE(u.username, '') AS author_name, \
     p.created_at, p.updated_at";

const POST_FROM: &str = "FROM posts p LEFT JOIN users u ON u.id = p.author_id";

macro_rules! post_from_row {
    ($row:expr) => {
        Post {
            id: $row.try_get("id")?,
            title: $row.try_get("title")?,
            slug: $row.try_get("slug")?,
            content: $row.try_get("content")?,
            excerpt: $row.try_get("excerpt")?,
            featured_image: $row.try_get("featured_image")?,
            published: $row.try_get("published")?,
            likes: $row.try_get("likes")?,
            author_id: $row.try_get("author_id")?,
            author_name: $row.try_get("author_name")?,
            created_at: $row.try_get("created_at")?,
            updated_at: $row.try_get("updated_at")?,
        }
    };
}

#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn create(&self, post: &Post) -> Result<Post>;

    async fn update(&self, post: &Post) -> Result<Post>;

    async fn delete(&self, id: i64) -> Result<bool>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Post>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Post>>;

    /// Whether another post already uses `slug`
    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;

    /// Newest first. `published_only` hides drafts.
    async fn list(&self, params: &ListParams, published_only: bool) -> Result<(Vec<Post>, i64)>;

    async fn count(&self, published_only: bool) -> Result<i64>;

    /// Case-insensitive substring match over title, content and excerpt
    async fn search(&self, term: &str, limit: i64, include_drafts: bool) -> Result<Vec<Post>>;

    /// Record a like for `fingerprint`; returns the like count, or `None`
    /// when the post does not exist
    async fn like(&self, post_id: i64, fingerprint: &str) -> Result<Option<i64>>;

    /// Delete drafts last touched before `before`
    async fn delete_drafts_before(&self, before: DateTime<Utc>) -> Result<u64>;

    /// Whether any post body or featured image mentions `needle`
    async fn references(&self, needle: &str) -> Result<bool>;
}

pub struct SqlxPostRepository {
    pool: DynDatabasePool,
}

impl SqlxPostRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PostRepository> {
        Arc::new(Self::new(pool))
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<Post>> {
        let sql = format!("SELECT {} {} WHERE {}", POST_COLUMNS, POST_FROM, clause);
        with_pool!(self.pool, conn => {
            let row = sqlx::query(&sql).bind(value).fetch_optional(conn).await?;
            row.map(|row| -> Result<Post> { Ok(post_from_row!(row)) }).transpose()
        })
    }
}

/// `INSERT ... IGNORE` spelled for each backend
pub(crate) fn insert_ignore(driver: DatabaseDriver) -> &'static str {
    match driver {
        DatabaseDriver::Sqlite => "INSERT OR IGNORE",
        DatabaseDriver::Mysql => "INSERT IGNORE",
    }
}

#[async_trait]
impl PostRepository for SqlxPostRepository {
    async fn create(&self, post: &Post) -> Result<Post> {
        let now = Utc::now();
        let id = with_pool!(self.pool, conn => {
            sqlx::query(
                "INSERT INTO posts (title, slug, content, excerpt, featured_image, published, \
                 likes, author_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
            )
            .bind(&post.title)
            .bind(&post.slug)
            .bind(&post.content)
            .bind(&post.excerpt)
            .bind(&post.featured_image)
            .bind(post.published)
            .bind(post.author_id)
            .bind(now)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to insert post")?
            .insert_id()
        });

        self.get_by_id(id)
            .await?
            .context("Post vanished after insert")
    }

    async fn update(&self, post: &Post) -> Result<Post> {
        let now = Utc::now();
        with_pool!(self.pool, conn => {
            sqlx::query(
                "UPDATE posts SET title = ?, slug = ?, content = ?, excerpt = ?, \
                 featured_image = ?, published = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&post.title)
            .bind(&post.slug)
            .bind(&post.content)
            .bind(&post.excerpt)
            .bind(&post.featured_image)
            .bind(post.published)
            .bind(now)
            .bind(post.id)
            .execute(conn)
            .await
            .context("Failed to update post")?;
        });
        Ok(Post {
            updated_at: now,
            ..post.clone()
        })
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        with_pool!(self.pool, conn => {
            let result = sqlx::query("DELETE FROM posts WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Post>> {
        let sql = format!("SELECT {} {} WHERE p.id = ?", POST_COLUMNS, POST_FROM);
        with_pool!(self.pool, conn => {
            let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
            row.map(|row| -> Result<Post> { Ok(post_from_row!(row)) }).transpose()
        })
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Post>> {
        self.fetch_one_where("p.slug = ?", slug).await
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        let exclude = exclude_id.unwrap_or(0);
        with_pool!(self.pool, conn => {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM posts WHERE slug = ? AND id <> ?")
                .bind(slug)
                .bind(exclude)
                .fetch_one(conn)
                .await?;
            let n: i64 = row.try_get("n")?;
            Ok(n > 0)
        })
    }

    async fn list(&self, params: &ListParams, published_only: bool) -> Result<(Vec<Post>, i64)> {
        let total = self.count(published_only).await?;
        let filter = if published_only { "WHERE p.published = ?" } else { "" };
        let sql = format!(
            "SELECT {} {} {} ORDER BY p.created_at DESC, p.id DESC LIMIT ? OFFSET ?",
            POST_COLUMNS, POST_FROM, filter
        );
        let posts = with_pool!(self.pool, conn => {
            let mut query = sqlx::query(&sql);
            if published_only {
                query = query.bind(true);
            }
            let rows = query
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(conn)
                .await?;
            rows.iter()
                .map(|row| -> Result<Post> { Ok(post_from_row!(row)) })
                .collect::<Result<Vec<_>>>()?
        });
        Ok((posts, total))
    }

    async fn count(&self, published_only: bool) -> Result<i64> {
        let sql = if published_only {
            "SELECT COUNT(*) AS n FROM posts WHERE published = ?"
        } else {
            "SELECT COUNT(*) AS n FROM posts"
        };
        with_pool!(self.pool, conn => {
            let mut query = sqlx::query(sql);
            if published_only {
                query = query.bind(true);
            }
            let row = query.fetch_one(conn).await?;
            Ok(row.try_get("n")?)
        })
    }

    async fn search(&self, term: &str, limit: i64, include_drafts: bool) -> Result<Vec<Post>> {
        let pattern = format!("%{}%", term.to_lowercase());
        let drafts = if include_drafts { "" } else { "AND p.published = ?" };
        let sql = format!(
            "SELECT {} {} WHERE (LOWER(p.title) LIKE ? OR LOWER(p.content) LIKE ? \
             OR LOWER(COALESCE(p.excerpt, '')) LIKE ?) {} \
             ORDER BY p.created_at DESC, p.id DESC LIMIT ?",
            POST_COLUMNS, POST_FROM, drafts
        );
        with_pool!(self.pool, conn => {
            let mut query = sqlx::query(&sql)
                .bind(&pattern)
                .bind(&pattern)
                .bind(&pattern);
            if !include_drafts {
                query = query.bind(true);
            }
            let rows = query.bind(limit).fetch_all(conn).await?;
            rows.iter()
                .map(|row| -> Result<Post> { Ok(post_from_row!(row)) })
                .collect()
        })
    }

    async fn like(&self, post_id: i64, fingerprint: &str) -> Result<Option<i64>> {
        let insert = format!(
            "{} INTO post_likes (post_id, fingerprint, created_at) VALUES (?, ?, ?)",
            insert_ignore(self.pool.driver())
        );
        let now = Utc::now();
        with_pool!(self.pool, conn => {
            let exists = sqlx::query("SELECT id FROM posts WHERE id = ?")
                .bind(post_id)
                .fetch_optional(conn)
                .await?
                .is_some();
            if !exists {
                return Ok(None);
            }

            let inserted = sqlx::query(&insert)
                .bind(post_id)
                .bind(fingerprint)
                .bind(now)
                .execute(conn)
                .await
                .context("Failed to record like")?
                .rows_affected();
            if inserted == 1 {
                sqlx::query("UPDATE posts SET likes = likes + 1 WHERE id = ?")
                    .bind(post_id)
                    .execute(conn)
                    .await?;
            }

            let row = sqlx::query("SELECT likes FROM posts WHERE id = ?")
                .bind(post_id)
                .fetch_one(conn)
                .await?;
            Ok(Some(row.try_get("likes")?))
        })
    }

    async fn delete_drafts_before(&self, before: DateTime<Utc>) -> Result<u64> {
        with_pool!(self.pool, conn => {
            let result = sqlx::query("DELETE FROM posts WHERE published = ? AND updated_at < ?")
                .bind(false)
                .bind(before)
                .execute(conn)
                .await?;
            Ok(result.rows_affected())
        })
    }

    async fn references(&self, needle: &str) -> Result<bool> {
        let pattern = format!("%{}%", needle);
        with_pool!(self.pool, conn => {
            let row = sqlx::query(
                "SELECT COUNT(*) AS n FROM posts WHERE content LIKE ? \
                 OR COALESCE(featured_image, '') LIKE ?",
            )
            .bind(&pattern)
            .bind(&pattern)
            .fetch_one(conn)
            .await?;
            let n: i64 = row.try_get("n")?;
            Ok(n > 0)
        })
    }
}
