//! External collaborators of a renewal: the interactive login and the
//! code-for-token exchange.
//!
//! ```text
//! BrokerCredentials
//!        │
//!        ▼
//! Authenticator::login ──► AuthorizationCode
//!        │ (bounded by the caller's timeout)
//!        ▼
//! TokenExchanger::exchange ──► AccessToken
//! ```
//!
//! Both are traits so the orchestrator and its tests never depend on a
//! browser or a live broker.

use crate::credentials::BrokerCredentials;
use crate::token::{AccessToken, AuthorizationCode};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

mod command;
mod exchange;
mod provider;

pub use command::{parse_login_output, CommandAuthenticator};
pub use exchange::HttpTokenExchanger;
pub use provider::{authorization_url, BrokerEndpoints};

/// Performs the interactive broker login.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Runs the login and returns the authorization code.
    ///
    /// The caller enforces `timeout` by dropping the future; implementations
    /// must release external resources on drop. `timeout` is passed along so
    /// an implementation can size its own internal waits.
    async fn login(
        &self,
        credentials: &BrokerCredentials,
        timeout: Duration,
    ) -> Result<AuthorizationCode>;
}

/// Trades an authorization code for an access token.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(
        &self,
        code: &AuthorizationCode,
        credentials: &BrokerCredentials,
    ) -> Result<AccessToken>;
}
