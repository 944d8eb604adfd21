//! Fast token cache.
//!
//! Holds only the current access token string. There is no TTL
//! here; whether a cached token may be handed out is decided by the ledger
//! and [`crate::policy::ExpiryPolicy`].

use crate::error::StoreError;
use crate::token::AccessToken;
use async_trait::async_trait;
use tokio::sync::RwLock;

mod redis;

pub use self::redis::RedisTokenCache;

/// Default cache key for the broker access token.
pub const DEFAULT_TOKEN_KEY: &str = "system:access_token";

/// Single-slot token cache.
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Returns the cached token, if any. Presence does not imply validity.
    async fn get(&self) -> Result<Option<AccessToken>, StoreError>;

    /// Replaces the cached token.
    async fn set(&self, token: &AccessToken) -> Result<(), StoreError>;

    /// Checks that the backing store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// In-process cache. Lost on restart, which only forces one extra login.
#[derive(Default)]
pub struct MemoryTokenCache {
    slot: RwLock<Option<AccessToken>>,
}

impl MemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenCache for MemoryTokenCache {
    async fn get(&self) -> Result<Option<AccessToken>, StoreError> {
        Ok(self.slot.read().await.clone())
    }

    async fn set(&self, token: &AccessToken) -> Result<(), StoreError> {
        *self.slot.write().await = Some(token.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
