//! Plugin registry repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{Plugin, PluginManifest};
use crate::with_pool;

const PLUGIN_COLUMNS: &str =
    "id, name, directory, active, version, author, description, created_at";

macro_rules! plugin_from_row {
    ($row:expr) => {
        Plugin {
            id: $row.try_get("id")?,
            name: $row.try_get("name")?,
            directory: $row.try_get("directory")?,
            active: $row.try_get("active")?,
            version: $row.try_get("version")?,
            author: $row.try_get("author")?,
            description: $row.try_get("description")?,
            created_at: $row.try_get("created_at")?,
        }
    };
}

#[async_trait]
pub trait PluginRepository: Send + Sync {
    async fn upsert(&self, directory: &str, manifest: &PluginManifest) -> Result<Plugin>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Plugin>>;

    async fn get_by_directory(&self, directory: &str) -> Result<Option<Plugin>>;

    async fn list(&self) -> Result<Vec<Plugin>>;

    async fn set_active(&self, id: i64, active: bool) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<bool>;
}

pub struct SqlxPluginRepository {
    pool: DynDatabasePool,
}

impl SqlxPluginRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PluginRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl PluginRepository for SqlxPluginRepository {
    async fn upsert(&self, directory: &str, manifest: &PluginManifest) -> Result<Plugin> {
        let id = match self.get_by_directory(directory).await? {
            Some(existing) => {
                with_pool!(self.pool, conn => {
                    sqlx::query(
                        "UPDATE plugins SET name = ?, version = ?, author = ?, description = ? \
                         WHERE id = ?",
                    )
                    .bind(&manifest.name)
                    .bind(&manifest.version)
                    .bind(&manifest.author)
                    .bind(&manifest.description)
                    .bind(existing.id)
                    .execute(conn)
                    .await
                    .context("Failed to update plugin")?;
                });
                existing.id
            }
            None => with_pool!(self.pool, conn => {
                sqlx::query(
                    "INSERT INTO plugins (name, directory, active, version, author, description, \
                     created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&manifest.name)
                .bind(directory)
                .bind(false)
                .bind(&manifest.version)
                .bind(&manifest.author)
                .bind(&manifest.description)
                .bind(Utc::now())
                .execute(conn)
                .await
                .context("Failed to insert plugin")?
                .insert_id()
            }),
        };
        self.get_by_id(id)
            .await?
            .context("Plugin vanished after save")
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Plugin>> {
        let sql = format!("SELECT {} FROM plugins WHERE id = ?", PLUGIN_COLUMNS);
        with_pool!(self.pool, conn => {
            let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
            row.map(|row| -> Result<Plugin> { Ok(plugin_from_row!(row)) }).transpose()
        })
    }

    async fn get_by_directory(&self, directory: &str) -> Result<Option<Plugin>> {
        let sql = format!("SELECT {} FROM plugins WHERE directory = ?", PLUGIN_COLUMNS);
        with_pool!(self.pool, conn => {
            let row = sqlx::query(&sql).bind(directory).fetch_optional(conn).await?;
            row.map(|row| -> Result<Plugin> { Ok(plugin_from_row!(row)) }).transpose()
        })
    }

    async fn list(&self) -> Result<Vec<Plugin>> {
        let sql = format!("SELECT {} FROM plugins ORDER BY name, id", PLUGIN_COLUMNS);
        with_pool!(self.pool, conn => {
            let rows = sqlx::query(&sql).fetch_all(conn).await?;
            rows.iter()
                .map(|row| -> Result<Plugin> { Ok(plugin_from_row!(row)) })
                .collect()
        })
    }

    async fn set_active(&self, id: i64, active: bool) -> Result<()> {
        with_pool!(self.pool, conn => {
            sqlx::query("UPDATE plugins SET active = ? WHERE id = ?")
                .bind(active)
                .bind(id)
                .execute(conn)
                .await?;
        });
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        with_pool!(self.pool, conn => {
            let result = sqlx::query("DELETE FROM plugins WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    fn manifest(name: &str) -> PluginManifest {
        PluginManifest {
            name: name.to_string(),
            version: "0.1.0".into(),
            author: "Dev".into(),
            description: "Does things".into(),
            hooks: vec![],
        }
    }

    #[tokio::test]
    async fn test_plugin_lifecycle() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let repo = SqlxPluginRepository::new(pool);

        let plugin = repo.upsert("seo", &manifest("SEO")).await.unwrap();
        assert!(!plugin.active);

        repo.set_active(plugin.id, true).await.unwrap();
        let again = repo.upsert("seo", &manifest("SEO Tools")).await.unwrap();
        assert_eq!(again.id, plugin.id);
        assert!(again.active);
        assert_eq!(again.name, "SEO Tools");

        assert!(repo.delete(plugin.id).await.unwrap());
        assert!(repo.list().await.unwrap().is_empty());
    }
}
