//! Settings repository
//!
//! Key/value rows with a type tag. The `key` column is quoted with backticks,
//! which both SQLite and MySQL accept.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

use crate::config::DatabaseDriver;
use crate::db::repositories::post::insert_ignore;
use crate::db::DynDatabasePool;
use crate::models::{Setting, SettingType};
use crate::with_pool;

macro_rules! setting_from_row {
    ($row:expr) => {
        Setting {
            key: $row.try_get("key")?,
            value: $row.try_get("value")?,
            setting_type: $row
                .try_get::<String, _>("type")?
                .parse::<SettingType>()
                .unwrap_or_default(),
            updated_at: $row.try_get("updated_at")?,
        }
    };
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Setting>>;

    /// Every setting ordered by key
    async fn get_all(&self) -> Result<Vec<Setting>>;

    /// Insert or replace a setting
    async fn set(&self, key: &str, value: &str, setting_type: SettingType) -> Result<()>;

    /// Insert only when the key is absent; returns whether a row was added
    async fn insert_if_absent(&self, key: &str, value: &str, setting_type: SettingType)
        -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    async fn clear(&self) -> Result<u64>;
}

pub struct SqlxSettingsRepository {
    pool: DynDatabasePool,
}

impl SqlxSettingsRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SettingsRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SettingsRepository for SqlxSettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<Setting>> {
        with_pool!(self.pool, conn => {
            let row = sqlx::query(
                "SELECT `key`, value, type, updated_at FROM settings WHERE `key` = ?",
            )
            .bind(key)
            .fetch_optional(conn)
            .await?;
            row.map(|row| -> Result<Setting> { Ok(setting_from_row!(row)) })
                .transpose()
        })
    }

    async fn get_all(&self) -> Result<Vec<Setting>> {
        with_pool!(self.pool, conn => {
            let rows = sqlx::query("SELECT `key`, value, type, updated_at FROM settings ORDER BY `key`")
                .fetch_all(conn)
                .await?;
            rows.iter()
                .map(|row| -> Result<Setting> { Ok(setting_from_row!(row)) })
                .collect()
        })
    }

    async fn set(&self, key: &str, value: &str, setting_type: SettingType) -> Result<()> {
        let sql = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                "INSERT INTO settings (`key`, value, type, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?) ON CONFLICT(`key`) DO UPDATE SET \
                 value = excluded.value, type = excluded.type, updated_at = excluded.updated_at"
            }
            DatabaseDriver::Mysql => {
                "INSERT INTO settings (`key`, value, type, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?) ON DUPLICATE KEY UPDATE \
                 value = VALUES(value), type = VALUES(type), updated_at = VALUES(updated_at)"
            }
        };
        let now = Utc::now();
        with_pool!(self.pool, conn => {
            sqlx::query(sql)
                .bind(key)
                .bind(value)
                .bind(setting_type.as_str())
                .bind(now)
                .bind(now)
                .execute(conn)
                .await
                .with_context(|| format!("Failed to save setting {}", key))?;
        });
        Ok(())
    }

    async fn insert_if_absent(
        &self,
        key: &str,
        value: &str,
        setting_type: SettingType,
    ) -> Result<bool> {
        let sql = format!(
            "{} INTO settings (`key`, value, type, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            insert_ignore(self.pool.driver())
        );
        let now = Utc::now();
        with_pool!(self.pool, conn => {
            let result = sqlx::query(&sql)
                .bind(key)
                .bind(value)
                .bind(setting_type.as_str())
                .bind(now)
                .bind(now)
                .execute(conn)
                .await?;
            Ok(result.rows_affected() == 1)
        })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        with_pool!(self.pool, conn => {
            let result = sqlx::query("DELETE FROM settings WHERE `key` = ?")
                .bind(key)
                .execute(conn)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    async fn clear(&self) -> Result<u64> {
        with_pool!(self.pool, conn => {
            let result = sqlx::query("DELETE FROM settings").execute(conn).await?;
            Ok(result.rows_affected())
        })
    }
}
