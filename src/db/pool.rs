//! Database connection pool abstraction
//!
//! A single `DatabasePool` trait covers SQLite and MySQL. Repositories write
//! their queries once and run them against whichever backend is configured
//! through the [`with_pool!`](crate::with_pool) macro.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlPool, MySqlPoolOptions, MySqlQueryResult},
    sqlite::{SqlitePool, SqlitePoolOptions, SqliteQueryResult},
};
use std::sync::Arc;

use crate::config::{DatabaseConfig, DatabaseDriver};

/// Backend-independent handle to a connection pool
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Execute a raw SQL statement that doesn't return rows
    async fn execute(&self, query: &str) -> Result<u64>;

    /// Check if the database connection is healthy
    async fn ping(&self) -> Result<()>;

    async fn close(&self);

    fn driver(&self) -> DatabaseDriver;

    fn as_sqlite(&self) -> Option<&SqlitePool>;

    fn as_mysql(&self) -> Option<&MySqlPool>;
}

/// Borrow the SQLite pool, failing if the handle wraps another backend
pub fn sqlite_pool(db: &dyn DatabasePool) -> Result<&SqlitePool> {
    db.as_sqlite()
        .ok_or_else(|| anyhow!("expected a SQLite pool, found {:?}", db.driver()))
}

/// Borrow the MySQL pool, failing if the handle wraps another backend
pub fn mysql_pool(db: &dyn DatabasePool) -> Result<&MySqlPool> {
    db.as_mysql()
        .ok_or_else(|| anyhow!("expected a MySQL pool, found {:?}", db.driver()))
}

/// Run one sqlx body against whichever backend the pool wraps.
///
/// The body is expanded once per driver with `$conn` bound to `&SqlitePool`
/// or `&MySqlPool`, so query builders and row accessors type-check against
/// each backend separately. Must be used inside a function returning
/// `anyhow::Result`.
#[macro_export]
macro_rules! with_pool {
    ($db:expr, $conn:ident => $body:expr) => {{
        match $db.driver() {
            $crate::config::DatabaseDriver::Sqlite => {
                let $conn = $crate::db::pool::sqlite_pool(&*$db)?;
                $body
            }
            $crate::config::DatabaseDriver::Mysql => {
                let $conn = $crate::db::pool::mysql_pool(&*$db)?;
                $body
            }
        }
    }};
}

/// Uniform access to the id generated by an INSERT
pub trait InsertId {
    fn insert_id(&self) -> i64;
}

impl InsertId for SqliteQueryResult {
    fn insert_id(&self) -> i64 {
        self.last_insert_rowid()
    }
}

impl InsertId for MySqlQueryResult {
    fn insert_id(&self) -> i64 {
        self.last_insert_id() as i64
    }
}

/// SQLite connection pool implementation
pub struct SqliteDatabase {
    pool: SqlitePool,
    path: Option<std::path::PathBuf>,
}

impl SqliteDatabase {
    /// Open (and create if needed) a SQLite database.
    ///
    /// Accepts a plain file path, a `sqlite:` URL or `:memory:`.
    pub async fn new(url: &str) -> Result<Self> {
        let in_memory = url.starts_with(":memory:") || url.starts_with("sqlite::memory:");

        let path = if in_memory {
            None
        } else {
            let raw = url.trim_start_matches("sqlite:");
            let raw = raw.split('?').next().unwrap_or(raw);
            let path = std::path::PathBuf::from(raw);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory: {:?}", parent)
                    })?;
                }
            }
            Some(path)
        };

        let connection_url = if url.starts_with("sqlite:") {
            if url.contains('?') {
                url.to_string()
            } else {
                format!("{}?mode=rwc", url)
            }
        } else if url == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", url)
        };

        // Every in-memory connection is its own database, so keep exactly one
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(20)
        };

        let pool = options
            .connect(&connection_url)
            .await
            .with_context(|| format!("Failed to connect to SQLite database: {}", url))?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .context("Failed to enable foreign keys")?;

        Ok(Self { pool, path })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Location of the database file, `None` for in-memory databases
    pub fn file_path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }
}

#[async_trait]
impl DatabasePool for SqliteDatabase {
    async fn execute(&self, query: &str) -> Result<u64> {
        let result = sqlx::query(query)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute query: {}", query))?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn driver(&self) -> DatabaseDriver {
        DatabaseDriver::Sqlite
    }

    fn as_sqlite(&self) -> Option<&SqlitePool> {
        Some(&self.pool)
    }

    fn as_mysql(&self) -> Option<&MySqlPool> {
        None
    }
}

/// MySQL connection pool implementation
pub struct MysqlDatabase {
    pool: MySqlPool,
}

impl MysqlDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let connection_url = if url.starts_with("mysql://") {
            url.to_string()
        } else {
            format!("mysql://{}", url)
        };

        let pool = MySqlPoolOptions::new()
            .max_connections(30)
            .connect(&connection_url)
            .await
            .with_context(|| format!("Failed to connect to MySQL database: {}", url))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl DatabasePool for MysqlDatabase {
    async fn execute(&self, query: &str) -> Result<u64> {
        let result = sqlx::query(query)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute query: {}", query))?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn driver(&self) -> DatabaseDriver {
        DatabaseDriver::Mysql
    }

    fn as_sqlite(&self) -> Option<&SqlitePool> {
        None
    }

    fn as_mysql(&self) -> Option<&MySqlPool> {
        Some(&self.pool)
    }
}

pub type DynDatabasePool = Arc<dyn DatabasePool>;

/// Create a database connection pool based on configuration
pub async fn create_pool(config: &DatabaseConfig) -> Result<DynDatabasePool> {
    match config.driver {
        DatabaseDriver::Sqlite => {
            let db = SqliteDatabase::new(&config.url).await?;
            Ok(Arc::new(db))
        }
        DatabaseDriver::Mysql => {
            let db = MysqlDatabase::new(&config.url).await?;
            Ok(Arc::new(db))
        }
    }
}

/// Create a SQLite in-memory database pool for testing
pub async fn create_test_pool() -> Result<DynDatabasePool> {
    let config = DatabaseConfig {
        driver: DatabaseDriver::Sqlite,
        url: ":memory:".to_string(),
    };
    create_pool(&config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn test_sqlite_pool_creation() {
        let pool = create_test_pool().await.expect("Failed to create pool");
        assert_eq!(pool.driver(), DatabaseDriver::Sqlite);
        assert!(pool.as_sqlite().is_some());
        assert!(pool.as_mysql().is_none());
        pool.ping().await.expect("Ping should succeed");
    }

    #[tokio::test]
    async fn test_accessors_reject_wrong_backend() {
        let pool = create_test_pool().await.unwrap();
        assert!(sqlite_pool(&*pool).is_ok());
        let err = mysql_pool(&*pool).unwrap_err();
        assert!(err.to_string().contains("MySQL"));
    }

    #[tokio::test]
    async fn test_with_pool_and_insert_id() {
        async fn insert_and_count(db: &DynDatabasePool) -> Result<(i64, i64)> {
            db.execute("CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT)")
                .await?;
            let id = with_pool!(*db, conn => {
                sqlx::query("INSERT INTO notes (body) VALUES (?)")
                    .bind("hello")
                    .execute(conn)
                    .await?
                    .insert_id()
            });
            let count: i64 = with_pool!(*db, conn => {
                sqlx::query("SELECT COUNT(*) AS n FROM notes")
                    .fetch_one(conn)
                    .await?
                    .try_get("n")?
            });
            Ok((id, count))
        }

        let pool = create_test_pool().await.unwrap();
        let (id, count) = insert_and_count(&pool).await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_sqlite_nested_directory_creation() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("nested").join("dir").join("webbly.db");

        let db = SqliteDatabase::new(&db_path.to_string_lossy())
            .await
            .expect("Failed to create pool");
        db.ping().await.expect("Ping should succeed");

        assert!(db_path.exists());
        assert_eq!(db.file_path(), Some(db_path.as_path()));
    }

    #[tokio::test]
    async fn test_in_memory_has_no_file_path() {
        let db = SqliteDatabase::new(":memory:").await.unwrap();
        assert!(db.file_path().is_none());
    }

    #[tokio::test]
    #[ignore = "Requires MySQL server"]
    async fn test_mysql_pool_ping() {
        let url = std::env::var("MYSQL_TEST_URL")
            .unwrap_or_else(|_| "mysql://root@localhost/test".to_string());

        let config = DatabaseConfig {
            driver: DatabaseDriver::Mysql,
            url,
        };

        let pool = create_pool(&config).await.expect("Failed to create pool");
        assert_eq!(pool.driver(), DatabaseDriver::Mysql);
        pool.ping().await.expect("Ping should succeed");
    }
}
