//! Redis client module with connection pooling
//!
//! Provides a minimal async Redis client with only the commands the store
//! backends use.

use anyhow::{Context, Result};
use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Redis connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
}

fn default_max_connections() -> u32 {
    16
}

fn default_connection_timeout() -> u64 {
    5
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            max_connections: default_max_connections(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

impl RedisConfig {
    /// Create config from URL with default pool settings
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Redis asynchronous client with connection pooling
pub struct RedisClient {
    pool: Arc<Pool<RedisConnectionManager>>,
    url: String,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("url", &self.url)
            .field("pool_state", &self.pool.state())
            .finish()
    }
}

impl RedisClient {
    /// Create a new client with default configuration
    pub async fn new(url: &str) -> Result<Self> {
        Self::with_config(RedisConfig::from_url(url)).await
    }

    /// Create a new client and verify the server answers PING
    pub async fn with_config(config: RedisConfig) -> Result<Self> {
        let client = Self::with_config_no_ping(config).await?;
        client.ping().await.context("Failed to ping Redis server")?;
        Ok(client)
    }

    /// Create a client without performing a PING test
    pub async fn with_config_no_ping(config: RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .context("Failed to create Redis connection manager")?;

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(Duration::from_secs(config.connection_timeout))
            .build(manager)
            .await
            .context("Failed to build Redis connection pool")?;

        Ok(Self {
            pool: Arc::new(pool),
            url: config.url,
        })
    }

    /// Get a connection from the pool
    ///
    /// Use this for commands or scripts not wrapped by `RedisClient`.
    pub async fn get_connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
        self.pool
            .get()
            .await
            .context("Failed to get connection from pool")
    }

    /// PING
    pub async fn ping(&self) -> Result<String> {
        let mut conn = self.get_connection().await?;
        redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("Failed to PING")
    }

    /// GET operation
    pub async fn get<T: redis::FromRedisValue>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.get_connection().await?;
        conn.get(key)
            .await
            .with_context(|| format!("Failed to GET key: {}", key))
    }

    /// Run a Lua script with keys and args
    pub async fn eval<T: redis::FromRedisValue>(
        &self,
        script: &redis::Script,
        keys: &[&str],
        args: &[String],
    ) -> Result<T> {
        let mut conn = self.get_connection().await?;
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg.as_str());
        }
        invocation
            .invoke_async(&mut *conn)
            .await
            .context("Failed to run Redis script")
    }

    /// ZADD with score 0 (lexicographic ordering); true when newly added
    pub async fn zadd_lex(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let added: u32 = conn
            .zadd(key, member, 0)
            .await
            .with_context(|| format!("Failed to ZADD to key: {}", key))?;
        Ok(added > 0)
    }

    /// ZREM operation; true when the member existed
    pub async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let removed: u32 = conn
            .zrem(key, member)
            .await
            .with_context(|| format!("Failed to ZREM from key: {}", key))?;
        Ok(removed > 0)
    }

    /// ZRANGE key 0 -1
    pub async fn zrange_all(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        conn.zrange(key, 0, -1)
            .await
            .with_context(|| format!("Failed to ZRANGE key: {}", key))
    }

    /// RPUSH operation
    pub async fn rpush(&self, key: &str, value: &str) -> Result<u32> {
        let mut conn = self.get_connection().await?;
        conn.rpush(key, value)
            .await
            .with_context(|| format!("Failed to RPUSH to key: {}", key))
    }

    /// LREM key count value
    pub async fn lrem(&self, key: &str, count: isize, value: &str) -> Result<u32> {
        let mut conn = self.get_connection().await?;
        conn.lrem(key, count, value)
            .await
            .with_context(|| format!("Failed to LREM from key: {}", key))
    }

    /// LRANGE key start stop
    pub async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        conn.lrange(key, start, stop)
            .await
            .with_context(|| format!("Failed to LRANGE key: {}", key))
    }

    /// LMOVE source destination LEFT RIGHT
    pub async fn lmove(&self, source: &str, destination: &str) -> Result<Option<String>> {
        let mut conn = self.get_connection().await?;
        redis::cmd("LMOVE")
            .arg(source)
            .arg(destination)
            .arg("LEFT")
            .arg("RIGHT")
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to LMOVE from key: {}", source))
    }

    /// BLMOVE source destination LEFT RIGHT timeout
    ///
    /// Returns `None` when the timeout expires with the source still empty.
    pub async fn blmove(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let mut conn = self.get_connection().await?;
        redis::cmd("BLMOVE")
            .arg(source)
            .arg(destination)
            .arg("LEFT")
            .arg("RIGHT")
            .arg(timeout.as_secs_f64())
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to BLMOVE from key: {}", source))
    }
}
