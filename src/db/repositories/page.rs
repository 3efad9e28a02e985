//! Page repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{Page, PageTemplate};
use crate::with_pool;

const PAGE_COLUMNS: &str = "p.id, p.title, p.slug, p.content, p.excerpt, p.template, \
     p.published, p.author_id, COALESCE(u.username, '') AS author_name, \
     p.created_at, p.updated_at";

const PAGE_FROM: &str = "FROM pages p LEFT JOIN users u ON u.id = p.author_id";

/// Unknown template names stored by older themes read back as the default layout
macro_rules! page_from_row {
    ($row:expr) => {
        Page {
            id: $row.try_get("id")?,
            title: $row.try_get("title")?,
            slug: $row.try_get("slug")?,
            content: $row.try_get("content")?,
            excerpt: $row.try_get("excerpt")?,
            template: $row
                .try_get::<String, _>("template")?
                .parse::<PageTemplate>()
                .unwrap_or_default(),
            published: $row.try_get("published")?,
            author_id: $row.try_get("author_id")?,
            author_name: $row.try_get("author_name")?,
            created_at: $row.try_get("created_at")?,
            updated_at: $row.try_get("updated_at")?,
        }
    };
}

#[async_trait]
pub trait PageRepository: Send + Sync {
    async fn create(&self, page: &Page) -> Result<Page>;

    async fn update(&self, page: &Page) -> Result<Page>;

    async fn delete(&self, id: i64) -> Result<bool>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Page>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Page>>;

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;

    /// Pages ordered by title
    async fn list(&self, published_only: bool) -> Result<Vec<Page>>;

    async fn count(&self) -> Result<i64>;

    /// Case-insensitive substring match over title and content
    async fn search(&self, term: &str, limit: i64, include_drafts: bool) -> Result<Vec<Page>>;

    /// Whether any page body mentions `needle`
    async fn references(&self, needle: &str) -> Result<bool>;
}

pub struct SqlxPageRepository {
    pool: DynDatabasePool,
}

impl SqlxPageRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PageRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl PageRepository for SqlxPageRepository {
    async fn create(&self, page: &Page) -> Result<Page> {
        let now = Utc::now();
        let id = with_pool!(self.pool, conn => {
            sqlx::query(
                "INSERT INTO pages (title, slug, content, excerpt, template, published, author_id, \
                 created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&page.title)
            .bind(&page.slug)
            .bind(&page.content)
            .bind(&page.excerpt)
            .bind(page.template.as_str())
            .bind(page.published)
            .bind(page.author_id)
            .bind(now)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to insert page")?
            .insert_id()
        });

        self.get_by_id(id)
            .await?
            .context("Page vanished after insert")
    }

    async fn update(&self, page: &Page) -> Result<Page> {
        let now = Utc::now();
        with_pool!(self.pool, conn => {
            sqlx::query(
                "UPDATE pages SET title = ?, slug = ?, content = ?, excerpt = ?, template = ?, \
                 published = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&page.title)
            .bind(&page.slug)
            .bind(&page.content)
            .bind(&page.excerpt)
            .bind(page.template.as_str())
            .bind(page.published)
            .bind(now)
            .bind(page.id)
            .execute(conn)
            .await
            .context("Failed to update page")?;
        });
        Ok(Page {
            updated_at: now,
            ..page.clone()
        })
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        with_pool!(self.pool, conn => {
            let result = sqlx::query("DELETE FROM pages WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Page>> {
        let sql = format!("SELECT {} {} WHERE p.id = ?", PAGE_COLUMNS, PAGE_FROM);
        with_pool!(self.pool, conn => {
            let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
            row.map(|row| -> Result<Page> { Ok(page_from_row!(row)) }).transpose()
        })
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Page>> {
        let sql = format!("SELECT {} {} WHERE p.slug = ?", PAGE_COLUMNS, PAGE_FROM);
        with_pool!(self.pool, conn => {
            let row = sqlx::query(&sql).bind(slug).fetch_optional(conn).await?;
            row.map(|row| -> Result<Page> { Ok(page_from_row!(row)) }).transpose()
        })
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        with_pool!(self.pool, conn => {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM pages WHERE slug = ? AND id <> ?")
                .bind(slug)
                .bind(exclude_id.unwrap_or(0))
                .fetch_one(conn)
                .await?;
            let n: i64 = row.try_get("n")?;
            Ok(n > 0)
        })
    }

    async fn list(&self, published_only: bool) -> Result<Vec<Page>> {
        let filter = if published_only { "WHERE p.published = ?" } else { "" };
        let sql = format!(
            "SELECT {} {} {} ORDER BY p.title, p.id",
            PAGE_COLUMNS, PAGE_FROM, filter
        );
        with_pool!(self.pool, conn => {
            let mut query = sqlx::query(&sql);
            if published_only {
                query = query.bind(true);
            }
            let rows = query.fetch_all(conn).await?;
            rows.iter()
                .map(|row| -> Result<Page> { Ok(page_from_row!(row)) })
                .collect()
        })
    }

    async fn count(&self) -> Result<i64> {
        with_pool!(self.pool, conn => {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM pages").fetch_one(conn).await?;
            Ok(row.try_get("n")?)
        })
    }

    async fn search(&self, term: &str, limit: i64, include_drafts: bool) -> Result<Vec<Page>> {
        let pattern = format!("%{}%", term.to_lowercase());
        let drafts = if include_drafts { "" } else { "AND p.published = ?" };
        let sql = format!(
            "SELECT {} {} WHERE (LOWER(p.title) LIKE ? OR LOWER(p.content) LIKE ?) {} \
             ORDER BY p.title, p.id LIMIT ?",
            PAGE_COLUMNS, PAGE_FROM, drafts
        );
        with_pool!(self.pool, conn => {
            let mut query = sqlx::query(&sql).bind(&pattern).bind(&pattern);
            if !include_drafts {
                query = query.bind(true);
            }
            let rows = query.bind(limit).fetch_all(conn).await?;
            rows.iter()
                .map(|row| -> Result<Page> { Ok(page_from_row!(row)) })
                .collect()
        })
    }

    async fn references(&self, needle: &str) -> Result<bool> {
        let pattern = format!("%{}%", needle);
        with_pool!(self.pool, conn => {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM pages WHERE content LIKE ?")
                .bind(&pattern)
                .fetch_one(conn)
                .await?;
            let n: i64 = row.try_get("n")?;
            Ok(n > 0)
        })
    }
}
