//! Persistent status ledger for the broker session.
//!
//! The ledger holds exactly one [`StatusRecord`]. It is the source of truth
//! for token validity: the cache only holds the token string, and whether
//! that string may be handed out is derived from this record every time.
//!
//! # Lifecycle
//!
//! ```text
//! NOT_ATTEMPTED ──► IN_PROGRESS ──► SUCCESS
//!                       ▲  │            │
//!                       │  └──► FAILED  │
//!                       │         │     │
//!                       └─────────┴─────┘
//! ```

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod sqlite;

pub use sqlite::SqliteStatusLedger;

/// Lifecycle state of the broker session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginState {
    NotAttempted,
    InProgress,
    Success,
    Failed,
}

impl LoginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginState::NotAttempted => "NOT_ATTEMPTED",
            LoginState::InProgress => "IN_PROGRESS",
            LoginState::Success => "SUCCESS",
            LoginState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_ATTEMPTED" => Ok(LoginState::NotAttempted),
            "IN_PROGRESS" => Ok(LoginState::InProgress),
            "SUCCESS" => Ok(LoginState::Success),
            "FAILED" => Ok(LoginState::Failed),
            other => Err(anyhow::anyhow!("Unknown login state '{}'", other)),
        }
    }
}

/// The singleton credential status record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub state: LoginState,

    /// Human-readable description of the last outcome
    pub message: String,

    /// When the current token was acquired. Only set on entering SUCCESS.
    pub fetched_at: Option<DateTime<Utc>>,

    /// Operator request to bypass the cached token on the next run
    pub force_renew: bool,

    /// When the state last changed
    pub updated_at: DateTime<Utc>,

    /// Renewal attempt holding IN_PROGRESS, if any
    pub attempt_id: Option<String>,
}

impl StatusRecord {
    pub const DEFAULT_MESSAGE: &'static str = "System has not attempted to log in yet.";

    /// The record written by first-time initialization.
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            state: LoginState::NotAttempted,
            message: Self::DEFAULT_MESSAGE.to_string(),
            fetched_at: None,
            force_renew: false,
            updated_at: now,
            attempt_id: None,
        }
    }
}

/// Partial update. Only fields that are `Some` are written.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatusUpdate {
    pub state: Option<LoginState>,
    pub message: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub force_renew: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
    /// `Some(None)` clears the attempt id.
    pub attempt_id: Option<Option<String>>,
}

impl StatusUpdate {
    /// A state transition stamped at `at`.
    pub fn transition(state: LoginState, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            state: Some(state),
            message: Some(message.into()),
            updated_at: Some(at),
            ..Default::default()
        }
    }

    pub fn force_renew(value: bool) -> Self {
        Self {
            force_renew: Some(value),
            ..Default::default()
        }
    }

    pub fn with_fetched_at(mut self, at: DateTime<Utc>) -> Self {
        self.fetched_at = Some(at);
        self
    }

    pub fn with_force_renew(mut self, value: bool) -> Self {
        self.force_renew = Some(value);
        self
    }

    pub fn with_attempt(mut self, attempt_id: Option<String>) -> Self {
        self.attempt_id = Some(attempt_id);
        self
    }

    /// Applies this update to an in-memory record.
    pub fn apply(&self, record: &mut StatusRecord) {
        if let Some(state) = self.state {
            record.state = state;
        }
        if let Some(message) = &self.message {
            record.message = message.clone();
        }
        if let Some(fetched_at) = self.fetched_at {
            record.fetched_at = Some(fetched_at);
        }
        if let Some(force_renew) = self.force_renew {
            record.force_renew = force_renew;
        }
        if let Some(updated_at) = self.updated_at {
            record.updated_at = updated_at;
        }
        if let Some(attempt_id) = &self.attempt_id {
            record.attempt_id = attempt_id.clone();
        }
    }
}

/// Persistent store for the singleton [`StatusRecord`].
///
/// Writes are last-writer-wins with no optimistic concurrency control.
#[async_trait]
pub trait StatusLedger: Send + Sync {
    /// Reads the record. [`StoreError::NotFound`] until seeded.
    async fn get(&self) -> Result<StatusRecord, StoreError>;

    /// Applies a partial update. [`StoreError::NotFound`] if not seeded.
    async fn set(&self, update: StatusUpdate) -> Result<(), StoreError>;

    /// Inserts the `NOT_ATTEMPTED` record if none exists.
    ///
    /// Returns `true` if this call created the record.
    async fn seed_default(&self) -> Result<bool, StoreError>;

    /// Checks that the backing store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}
