//! Broker login credentials and their encrypted store.
//!
//! The session manager treats credentials as opaque read-only input. They
//! are written by an operator (see `PUT /api/session/credentials`) and read
//! once per renewal attempt through [`CredentialSource`].
//!
//! ```text
//! ┌─────────────────────────────┐
//! │  CredentialStore             │  store / get / delete per profile
//! └─────────────────────────────┘
//!          ↓ serde_json    ↑
//! ┌─────────────────────────────┐
//! │  Cipher (AES-256-GCM)        │  one sealed blob per profile
//! └─────────────────────────────┘
//!          ↓               ↑
//! ┌─────────────────────────────┐
//! │  SQLite                      │
//! └─────────────────────────────┘
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

mod encryption;
mod storage;

pub use encryption::{Cipher, Sealed};
pub use storage::{CredentialStore, DEFAULT_PROFILE};

/// Everything the interactive login and the token exchange need.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerCredentials {
    /// OAuth client id issued by the broker
    pub api_key: String,

    /// OAuth client secret
    pub secret_key: String,

    /// Registered callback address the login redirects to
    pub redirect_uri: String,

    /// Base32 seed for the broker's time-based one-time password
    pub totp_key: String,

    /// Account identifier entered on the login page
    pub mobile_no: String,

    /// Numeric account PIN
    pub pin: String,
}

impl fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("totp_key", &"<redacted>")
            .field("mobile_no", &self.mobile_no)
            .field("pin", &"<redacted>")
            .finish()
    }
}

/// Where the orchestrator reads broker credentials from.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// `Ok(None)` means no credentials have been configured.
    async fn load(&self) -> Result<Option<BrokerCredentials>>;
}

#[async_trait]
impl CredentialSource for CredentialStore {
    async fn load(&self) -> Result<Option<BrokerCredentials>> {
        self.get(DEFAULT_PROFILE)
    }
}

/// Fixed credentials, for tests and single-shot tools.
pub struct StaticCredentials(pub Option<BrokerCredentials>);

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn load(&self) -> Result<Option<BrokerCredentials>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = BrokerCredentials {
            api_key: "client-id".to_string(),
            secret_key: "s3cr3t".to_string(),
            redirect_uri: "https://example.com/cb".to_string(),
            totp_key: "JBSWY3DPEHPK3PXP".to_string(),
            mobile_no: "9999999999".to_string(),
            pin: "654321".to_string(),
        };

        let debug = format!("{:?}", creds);
        assert!(debug.contains("client-id"));
        assert!(!debug.contains("s3cr3t"));
        assert!(!debug.contains("JBSWY3DPEHPK3PXP"));
        assert!(!debug.contains("654321"));
    }
}
