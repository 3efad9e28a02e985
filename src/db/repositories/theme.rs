//! Theme registry repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{Theme, ThemeManifest};
use crate::with_pool;

const THEME_COLUMNS: &str =
    "id, name, directory, active, version, author, description, screenshot, created_at";

macro_rules! theme_from_row {
    ($row:expr) => {
        Theme {
            id: $row.try_get("id")?,
            name: $row.try_get("name")?,
            directory: $row.try_get("directory")?,
            active: $row.try_get("active")?,
            version: $row.try_get("version")?,
            author: $row.try_get("author")?,
            description: $row.try_get("description")?,
            screenshot: $row.try_get("screenshot")?,
            created_at: $row.try_get("created_at")?,
        }
    };
}

#[async_trait]
pub trait ThemeRepository: Send + Sync {
    /// Insert the directory or refresh its manifest fields, keeping `active`
    async fn upsert(&self, directory: &str, manifest: &ThemeManifest) -> Result<Theme>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Theme>>;

    async fn get_by_directory(&self, directory: &str) -> Result<Option<Theme>>;

    async fn list(&self) -> Result<Vec<Theme>>;

    async fn active(&self) -> Result<Option<Theme>>;

    /// Make `id` the only active theme
    async fn set_active(&self, id: i64) -> Result<()>;
}

pub struct SqlxThemeRepository {
    pool: DynDatabasePool,
}

impl SqlxThemeRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ThemeRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ThemeRepository for SqlxThemeRepository {
    async fn upsert(&self, directory: &str, manifest: &ThemeManifest) -> Result<Theme> {
        if let Some(existing) = self.get_by_directory(directory).await? {
            with_pool!(self.pool, conn => {
                sqlx::query(
                    "UPDATE themes SET name = ?, version = ?, author = ?, description = ?, \
                     screenshot = ? WHERE id = ?",
                )
                .bind(&manifest.name)
                .bind(&manifest.version)
                .bind(&manifest.author)
                .bind(&manifest.description)
                .bind(&manifest.screenshot)
                .bind(existing.id)
                .execute(conn)
                .await
                .context("Failed to update theme")?;
            });
            return self
                .get_by_id(existing.id)
                .await?
                .context("Theme vanished after update");
        }

        let id = with_pool!(self.pool, conn => {
            sqlx::query(
                "INSERT INTO themes (name, directory, active, version, author, description, \
                 screenshot, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&manifest.name)
            .bind(directory)
            .bind(false)
            .bind(&manifest.version)
            .bind(&manifest.author)
            .bind(&manifest.description)
            .bind(&manifest.screenshot)
            .bind(Utc::now())
            .execute(conn)
            .await
            .context("Failed to insert theme")?
            .insert_id()
        });
        self.get_by_id(id)
            .await?
            .context("Theme vanished after insert")
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Theme>> {
        let sql = format!("SELECT {} FROM themes WHERE id = ?", THEME_COLUMNS);
        with_pool!(self.pool, conn => {
            let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
            row.map(|row| -> Result<Theme> { Ok(theme_from_row!(row)) }).transpose()
        })
    }

    async fn get_by_directory(&self, directory: &str) -> Result<Option<Theme>> {
        let sql = format!("SELECT {} FROM themes WHERE directory = ?", THEME_COLUMNS);
        with_pool!(self.pool, conn => {
            let row = sqlx::query(&sql).bind(directory).fetch_optional(conn).await?;
            row.map(|row| -> Result<Theme> { Ok(theme_from_row!(row)) }).transpose()
        })
    }

    async fn list(&self) -> Result<Vec<Theme>> {
        let sql = format!("SELECT {} FROM themes ORDER BY name, id", THEME_COLUMNS);
        with_pool!(self.pool, conn => {
            let rows = sqlx::query(&sql).fetch_all(conn).await?;
            rows.iter()
                .map(|row| -> Result<Theme> { Ok(theme_from_row!(row)) })
                .collect()
        })
    }

    async fn active(&self) -> Result<Option<Theme>> {
        let sql = format!("SELECT {} FROM themes WHERE active = ? LIMIT 1", THEME_COLUMNS);
        with_pool!(self.pool, conn => {
            let row = sqlx::query(&sql).bind(true).fetch_optional(conn).await?;
            row.map(|row| -> Result<Theme> { Ok(theme_from_row!(row)) }).transpose()
        })
    }

    async fn set_active(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, conn => {
            sqlx::query("UPDATE themes SET active = (id = ?)")
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to activate theme")?;
        });
        Ok(())
    }
}
