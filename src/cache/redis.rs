//! Redis cache for multi-instance deployments
//!
//! Keys are namespaced under `webbly:` so `clear` can SCAN and delete only
//! this application's entries instead of flushing the whole database.

use super::CacheLayer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

const NAMESPACE: &str = "webbly:";

const SCAN_COUNT: usize = 100;

pub struct RedisCache {
    connection: MultiplexedConnection,
    default_ttl: Duration,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    pub async fn with_ttl(redis_url: &str, default_ttl: Duration) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to create Redis client")?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self {
            connection,
            default_ttl,
        })
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn namespaced(key: &str) -> String {
        format!("{}{}", NAMESPACE, key)
    }

    async fn scan_delete(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .context("Failed to scan Redis keys")?;
            if !keys.is_empty() {
                let removed: u64 = conn
                    .del(&keys)
                    .await
                    .context("Failed to delete Redis keys")?;
                deleted += removed;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl CacheLayer for RedisCache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(Self::namespaced(key))
            .await
            .context("Failed to read from Redis")?;
        raw.map(|json| serde_json::from_str(&json).context("Failed to deserialize cached value"))
            .transpose()
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;
        let _: () = conn
            .set_ex(Self::namespaced(key), json, ttl.as_secs().max(1))
            .await
            .context("Failed to write to Redis")?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(Self::namespaced(key))
            .await
            .context("Failed to delete Redis key")?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        self.scan_delete(&Self::namespaced(pattern)).await
    }

    async fn clear(&self) -> Result<()> {
        self.scan_delete(&format!("{}*", NAMESPACE)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_keys() {
        assert_eq!(RedisCache::namespaced("search:abc"), "webbly:search:abc");
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_round_trip_against_server() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let cache = RedisCache::with_ttl(&url, Duration::from_secs(60)).await.unwrap();
        cache.set("t", &5u8, Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.get::<u8>("t").await.unwrap(), Some(5));
        assert_eq!(cache.delete_pattern("t*").await.unwrap(), 1);
    }
}
