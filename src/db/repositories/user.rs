//! User repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{ListParams, User};
use crate::with_pool;

macro_rules! user_from_row {
    ($row:expr) => {
        User {
            id: $row.try_get("id")?,
            username: $row.try_get("username")?,
            email: $row.try_get("email")?,
            password_hash: $row.try_get("password_hash")?,
            is_admin: $row.try_get("is_admin")?,
            created_at: $row.try_get("created_at")?,
            updated_at: $row.try_get("updated_at")?,
        }
    };
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<User>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Persist username, email, password hash and admin flag
    async fn update(&self, user: &User) -> Result<User>;

    async fn delete(&self, id: i64) -> Result<()>;

    async fn count(&self) -> Result<i64>;

    /// Users ordered by id
    async fn list(&self, params: &ListParams) -> Result<(Vec<User>, i64)>;

    /// Email addresses of every administrator
    async fn admin_emails(&self) -> Result<Vec<String>>;
}

pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }

    async fn get_by_column(&self, column: &str, value: &str) -> Result<Option<User>> {
        let sql = format!(
            "SELECT id, username, email, password_hash, is_admin, created_at, updated_at \
             FROM users WHERE {} = ?",
            column
        );
        with_pool!(self.pool, conn => {
            let row = sqlx::query(&sql).bind(value).fetch_optional(conn).await?;
            row.map(|row| -> Result<User> { Ok(user_from_row!(row)) }).transpose()
        })
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        let now = Utc::now();
        let id = with_pool!(self.pool, conn => {
            sqlx::query(
                "INSERT INTO users (username, email, password_hash, is_admin, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.is_admin)
            .bind(now)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to insert user")?
            .insert_id()
        });

        Ok(User {
            id,
            created_at: now,
            updated_at: now,
            ..user.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        with_pool!(self.pool, conn => {
            let row = sqlx::query(
                "SELECT id, username, email, password_hash, is_admin, created_at, updated_at \
                 FROM users WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(conn)
            .await?;
            row.map(|row| -> Result<User> { Ok(user_from_row!(row)) }).transpose()
        })
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        self.get_by_column("username", username).await
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        self.get_by_column("email", email).await
    }

    async fn update(&self, user: &User) -> Result<User> {
        let now = Utc::now();
        with_pool!(self.pool, conn => {
            sqlx::query(
                "UPDATE users SET username = ?, email = ?, password_hash = ?, is_admin = ?, \
                 updated_at = ? WHERE id = ?",
            )
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.is_admin)
            .bind(now)
            .bind(user.id)
            .execute(conn)
            .await
            .context("Failed to update user")?;
        });
        Ok(User {
            updated_at: now,
            ..user.clone()
        })
    }

    async fn delete(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, conn => {
            sqlx::query("DELETE FROM users WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await?;
        });
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        with_pool!(self.pool, conn => {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM users").fetch_one(conn).await?;
            Ok(row.try_get("n")?)
        })
    }

    async fn list(&self, params: &ListParams) -> Result<(Vec<User>, i64)> {
        let total = self.count().await?;
        let users = with_pool!(self.pool, conn => {
            let rows = sqlx::query(
                "SELECT id, username, email, password_hash, is_admin, created_at, updated_at \
                 FROM users ORDER BY id LIMIT ? OFFSET ?",
            )
            .bind(params.limit())
            .bind(params.offset())
            .fetch_all(conn)
            .await?;
            rows.iter()
                .map(|row| -> Result<User> { Ok(user_from_row!(row)) })
                .collect::<Result<Vec<_>>>()?
        });
        Ok((users, total))
    }

    async fn admin_emails(&self) -> Result<Vec<String>> {
        with_pool!(self.pool, conn => {
            let rows = sqlx::query("SELECT email FROM users WHERE is_admin = ? ORDER BY id")
                .bind(true)
                .fetch_all(conn)
                .await?;
            rows.iter()
                .map(|row| -> Result<String> { Ok(row.try_get("email")?) })
                .collect()
        })
    }
}
