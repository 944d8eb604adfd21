//! Error taxonomy for the session lifecycle.
//!
//! Store adapters and collaborators use `anyhow` internally; these enums are
//! what crosses the orchestrator boundary.

use thiserror::Error;

/// Errors raised by the status ledger and token cache adapters.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The singleton status record has not been seeded yet.
    #[error("status record not found")]
    NotFound,

    /// The backing store could not be reached or returned an error.
    #[error("storage unavailable: {0:#}")]
    Unavailable(#[from] anyhow::Error),
}

/// Why a renewal attempt did not produce a usable token.
#[derive(Error, Debug)]
pub enum LoginError {
    /// The interactive login timed out, failed, or produced no code.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The broker rejected the code exchange or the request failed.
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),

    /// The ledger, cache, or credential store could not be read or written.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The renewal task stopped before finishing, e.g. a collaborator panicked.
    #[error("renewal aborted: {0}")]
    RenewalAborted(String),

    /// Another process held the renewal lock and did not end in a usable token.
    #[error("concurrent renewal attempt did not succeed: {0}")]
    ConcurrentAttempt(String),
}

/// Errors returned by [`crate::manager::SessionManager::acquire_token`].
#[derive(Error, Debug)]
pub enum SessionError {
    /// Status record or broker credentials are absent. Not retried.
    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    /// The attempt failed and the ledger records `FAILED`.
    #[error("login failed: {0}")]
    LoginFailed(#[source] LoginError),

    /// The attempt failed and recording `FAILED` also failed.
    #[error("login failed: {cause}; status update also failed: {update}")]
    StatusUpdateFailed {
        cause: LoginError,
        update: StoreError,
    },

    /// Another process is renewing and did not finish within the wait bound.
    #[error("token renewal already in progress")]
    RenewalInProgress,
}

impl SessionError {
    /// The underlying renewal failure, if this error came from an attempt.
    pub fn login_error(&self) -> Option<&LoginError> {
        match self {
            SessionError::LoginFailed(cause) => Some(cause),
            SessionError::StatusUpdateFailed { cause, .. } => Some(cause),
            _ => None,
        }
    }
}
