//! Session repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

use crate::db::DynDatabasePool;
use crate::models::Session;
use crate::with_pool;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<Session>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Log a user out everywhere
    async fn delete_by_user(&self, user_id: i64) -> Result<()>;

    /// Remove sessions past their expiry, returning how many went
    async fn delete_expired(&self) -> Result<u64>;
}

pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session> {
        with_pool!(self.pool, conn => {
            sqlx::query(
                "INSERT INTO sessions (id, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&session.id)
            .bind(session.user_id)
            .bind(session.expires_at)
            .bind(session.created_at)
            .execute(conn)
            .await
            .context("Failed to insert session")?;
        });
        Ok(session.clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        with_pool!(self.pool, conn => {
            let row = sqlx::query(
                "SELECT id, user_id, expires_at, created_at FROM sessions WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(conn)
            .await?;
            row.map(|row| -> Result<Session> {
                Ok(Session {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    expires_at: row.try_get("expires_at")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .transpose()
        })
    }

    async fn delete(&self, id: &str) -> Result<()> {
        with_pool!(self.pool, conn => {
            sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await?;
        });
        Ok(())
    }

    async fn delete_by_user(&self, user_id: i64) -> Result<()> {
        with_pool!(self.pool, conn => {
            sqlx::query("DELETE FROM sessions WHERE user_id = ?")
                .bind(user_id)
                .execute(conn)
                .await?;
        });
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        with_pool!(self.pool, conn => {
            let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
                .bind(now)
                .execute(conn)
                .await?;
            Ok(result.rows_affected())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::User;
    use chrono::Duration;

    async fn setup() -> (SqlxSessionRepository, i64) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let user = SqlxUserRepository::new(pool.clone())
            .create(&User::new(
                "sam".into(),
                "sam@example.com".into(),
                "hash".into(),
                false,
            ))
            .await
            .unwrap();
        (SqlxSessionRepository::new(pool), user.id)
    }

    fn session(user_id: i64, hours: i64) -> Session {
        let now = Utc::now();
        Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            expires_at: now + Duration::hours(hours),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (repo, user_id) = setup().await;
        let created = repo.create(&session(user_id, 1)).await.unwrap();
        let fetched = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.user_id, user_id);
        assert!(!fetched.is_expired());
        assert!(repo.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let (repo, user_id) = setup().await;
        let live = repo.create(&session(user_id, 1)).await.unwrap();
        let dead = repo.create(&session(user_id, -1)).await.unwrap();

        assert_eq!(repo.delete_expired().await.unwrap(), 1);
        assert!(repo.get_by_id(&live.id).await.unwrap().is_some());
        assert!(repo.get_by_id(&dead.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_by_user() {
        let (repo, user_id) = setup().await;
        let a = repo.create(&session(user_id, 1)).await.unwrap();
        repo.create(&session(user_id, 2)).await.unwrap();
        repo.delete_by_user(user_id).await.unwrap();
        assert!(repo.get_by_id(&a.id).await.unwrap().is_none());
    }
}
