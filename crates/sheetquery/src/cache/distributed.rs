//! Optional shared cache tier
//!
//! The tier speaks the small command set the engine needs: GET, SETEX, DEL and
//! KEYS. Every failure comes back as a [`CacheError`]; the tiered cache turns
//! those into misses.

use crate::config::DistributedTierConfig;
use crate::error::CacheError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, IntoConnectionInfo};
use std::future::Future;
use std::time::Duration;

#[async_trait]
pub trait DistributedTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Delete keys, returning how many existed
    async fn del(&self, keys: &[String]) -> Result<u64, CacheError>;

    /// Keys matching a glob pattern such as `cache:data:abc:*`
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Whether the last command reached the backend
    fn is_connected(&self) -> bool;
}

/// Redis implementation over one multiplexed connection
pub struct RedisTier {
    conn: MultiplexedConnection,
    command_timeout: Duration,
    connected: std::sync::atomic::AtomicBool,
}

impl RedisTier {
    /// Connect within `connect_timeout`
    pub async fn connect(config: &DistributedTierConfig) -> Result<Self, CacheError> {
        let mut info = config.url.as_str().into_connection_info()?;
        if let Some(password) = &config.password {
            info.redis.password = Some(password.clone());
        }
        let client = redis::Client::open(info)?;
        let conn = tokio::time::timeout(
            config.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheError::Timeout(config.connect_timeout))??;

        diagnostics::log_info!("Connected distributed cache at {url}", url: config.url.as_str());
        Ok(Self {
            conn,
            command_timeout: config.command_timeout,
            connected: std::sync::atomic::AtomicBool::new(true),
        })
    }

    async fn run<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = redis::RedisResult<T>> + Send,
    {
        let result = match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Redis(e)),
            Err(_) => Err(CacheError::Timeout(self.command_timeout)),
        };
        self.connected
            .store(result.is_ok(), std::sync::atomic::Ordering::Relaxed);
        result
    }
}

#[async_trait]
impl DistributedTier for RedisTier {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        self.run(async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        // SETEX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.conn.clone();
        self.run(async move { conn.set_ex::<_, _, ()>(key, value, seconds).await })
            .await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        self.run(async move { conn.del::<_, u64>(keys).await }).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        self.run(async move { conn.keys::<_, Vec<String>>(pattern).await })
            .await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::Relaxed)
    }
}
