//! Redis-backed token cache.

use super::TokenCache;
use crate::error::StoreError;
use crate::token::AccessToken;
use anyhow::Context;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::info;

/// Token cache stored under a single Redis string key.
pub struct RedisTokenCache {
    conn: MultiplexedConnection,
    key: String,
}

impl RedisTokenCache {
    /// Connects to Redis and verifies the connection with `PING`.
    pub async fn connect(redis_url: &str, key: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::open(redis_url).context("Invalid Redis URL")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        let cache = Self {
            conn,
            key: key.into(),
        };
        cache.ping().await?;

        info!(key = %cache.key, "Redis token cache connected");
        Ok(cache)
    }
}

#[async_trait]
impl TokenCache for RedisTokenCache {
    async fn get(&self) -> Result<Option<AccessToken>, StoreError> {
        let value: Option<String> = self
            .conn
            .clone()
            .get(&self.key)
            .await
            .context("Failed to read token from Redis")?;
        Ok(value.map(AccessToken::new))
    }

    async fn set(&self, token: &AccessToken) -> Result<(), StoreError> {
        let _: () = self
            .conn
            .clone()
            .set(&self.key, token.as_str())
            .await
            .context("Failed to write token to Redis")?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn.clone())
            .await
            .context("Redis ping failed")?;
        Ok(())
    }
}
