//! Comment repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{Comment, ListParams};
use crate::with_pool;

const COMMENT_COLUMNS: &str =
    "id, post_id, author_id, author_name, author_email, content, approved, created_at";

macro_rules! comment_from_row {
    ($row:expr) => {
        Comment {
            id: $row.try_get("id")?,
            post_id: $row.try_get("post_id")?,
            author_id: $row.try_get("author_id")?,
            author_name: $row.try_get("author_name")?,
            author_email: $row.try_get("author_email")?,
            content: $row.try_get("content")?,
            approved: $row.try_get("approved")?,
            created_at: $row.try_get("created_at")?,
        }
    };
}

#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn create(&self, comment: &Comment) -> Result<Comment>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Comment>>;

    /// Mark as approved; `false` if the comment does not exist
    async fn approve(&self, id: i64) -> Result<bool>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Approved comments of a post, oldest first
    async fn list_approved_for_post(&self, post_id: i64) -> Result<Vec<Comment>>;

    /// Every comment, newest first
    async fn list_all(&self, params: &ListParams) -> Result<(Vec<Comment>, i64)>;

    async fn count(&self) -> Result<i64>;

    async fn count_pending(&self) -> Result<i64>;

    async fn count_since(&self, since: DateTime<Utc>) -> Result<i64>;
}

pub struct SqlxCommentRepository {
    pool: DynDatabasePool,
}

impl SqlxCommentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CommentRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl CommentRepository for SqlxCommentRepository {
    async fn create(&self, comment: &Comment) -> Result<Comment> {
        let id = with_pool!(self.pool, conn => {
            sqlx::query(
                "INSERT INTO comments (post_id, author_id, author_name, author_email, content, \
                 approved, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(comment.post_id)
            .bind(comment.author_id)
            .bind(&comment.author_name)
            .bind(&comment.author_email)
            .bind(&comment.content)
            .bind(comment.approved)
            .bind(comment.created_at)
            .execute(conn)
            .await
            .context("Failed to insert comment")?
            .insert_id()
        });
        Ok(Comment {
            id,
            ..comment.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Comment>> {
        let sql = format!("SELECT {} FROM comments WHERE id = ?", COMMENT_COLUMNS);
        with_pool!(self.pool, conn => {
            let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
            row.map(|row| -> Result<Comment> { Ok(comment_from_row!(row)) })
                .transpose()
        })
    }

    async fn approve(&self, id: i64) -> Result<bool> {
        with_pool!(self.pool, conn => {
            let result = sqlx::query("UPDATE comments SET approved = ? WHERE id = ?")
                .bind(true)
                .bind(id)
                .execute(conn)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        with_pool!(self.pool, conn => {
            let result = sqlx::query("DELETE FROM comments WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    async fn list_approved_for_post(&self, post_id: i64) -> Result<Vec<Comment>> {
        let sql = format!(
            "SELECT {} FROM comments WHERE post_id = ? AND approved = ? ORDER BY created_at, id",
            COMMENT_COLUMNS
        );
        with_pool!(self.pool, conn => {
            let rows = sqlx::query(&sql)
                .bind(post_id)
                .bind(true)
                .fetch_all(conn)
                .await?;
            rows.iter()
                .map(|row| -> Result<Comment> { Ok(comment_from_row!(row)) })
                .collect()
        })
    }

    async fn list_all(&self, params: &ListParams) -> Result<(Vec<Comment>, i64)> {
        let total = self.count().await?;
        let sql = format!(
            "SELECT {} FROM comments ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            COMMENT_COLUMNS
        );
        let comments = with_pool!(self.pool, conn => {
            let rows = sqlx::query(&sql)
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(conn)
                .await?;
            rows.iter()
                .map(|row| -> Result<Comment> { Ok(comment_from_row!(row)) })
                .collect::<Result<Vec<_>>>()?
        });
        Ok((comments, total))
    }

    async fn count(&self) -> Result<i64> {
        with_pool!(self.pool, conn => {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM comments")
                .fetch_one(conn)
                .await?;
            Ok(row.try_get("n")?)
        })
    }

    async fn count_pending(&self) -> Result<i64> {
        with_pool!(self.pool, conn => {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM comments WHERE approved = ?")
                .bind(false)
                .fetch_one(conn)
                .await?;
            Ok(row.try_get("n")?)
        })
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<i64> {
        with_pool!(self.pool, conn => {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM comments WHERE created_at >= ?")
                .bind(since)
                .fetch_one(conn)
                .await?;
            Ok(row.try_get("n")?)
        })
    }
}
