//! Session lifecycle orchestrator.
//!
//! [`SessionManager::acquire_token`] hands out the cached broker token while
//! the ledger says it is still valid, and otherwise drives one renewal:
//!
//! ```text
//! read record + credentials ──► fast path? ──yes──► cached token (no writes)
//!                                   │no
//!                                   ▼
//!              foreign IN_PROGRESS (fresh)? ──yes──► wait for it to settle
//!                                   │no
//!                                   ▼
//!   IN_PROGRESS ──► login (timeout) ──► exchange ──► cache ──► SUCCESS
//!                        │                 │           │          │
//!                        └─────────────────┴───────────┴──────────┴──► FAILED
//! ```
//!
//! Renewals in this process are serialized by a single-flight lock. Across
//! processes, a recent `IN_PROGRESS` record acts as an advisory lock; one
//! older than `stale_after` is considered abandoned.

use crate::cache::TokenCache;
use crate::clock::Clock;
use crate::credentials::{BrokerCredentials, CredentialSource};
use crate::error::{LoginError, SessionError, StoreError};
use crate::ledger::{LoginState, StatusLedger, StatusRecord, StatusUpdate};
use crate::login::{Authenticator, TokenExchanger};
use crate::policy::ExpiryPolicy;
use crate::token::AccessToken;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;


/// Timing knobs for renewals and the cross-process lock.
#[derive(Clone, Debug, PartialEq)]
pub struct ManagerSettings {
    /// Upper bound on the interactive login
    pub login_timeout: Duration,

    /// Age after which a foreign `IN_PROGRESS` is treated as abandoned
    pub stale_after: Duration,

    /// How long to wait for a foreign renewal to settle
    pub wait_timeout: Duration,

    /// Ledger polling interval while waiting
    pub poll_interval: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            login_timeout: Duration::from_secs(120),
            stale_after: Duration::from_secs(600),
            wait_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Everything the orchestrator talks to, constructed by the caller.
pub struct Collaborators {
    pub ledger: Arc<dyn StatusLedger>,
    pub cache: Arc<dyn TokenCache>,
    pub credentials: Arc<dyn CredentialSource>,
    pub authenticator: Arc<dyn Authenticator>,
    pub exchanger: Arc<dyn TokenExchanger>,
}

/// Reachability of one backing store.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ComponentHealth {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<(), StoreError>> for ComponentHealth {
    fn from(result: Result<(), StoreError>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(e) => Self {
                ok: false,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct HealthReport {
    pub ledger: ComponentHealth,
    pub cache: ComponentHealth,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.ledger.ok && self.cache.ok
    }
}

/// Outcome of waiting on another process's renewal.
enum Settled {
    Token(AccessToken),
    Unusable(StatusRecord),
    StillRunning,
}

struct Inner {
    ledger: Arc<dyn StatusLedger>,
    cache: Arc<dyn TokenCache>,
    credentials: Arc<dyn CredentialSource>,
    authenticator: Arc<dyn Authenticator>,
    exchanger: Arc<dyn TokenExchanger>,
    policy: ExpiryPolicy,
    clock: Arc<dyn Clock>,
    settings: ManagerSettings,
    single_flight: Arc<Mutex<()>>,
}

/// Cheaply cloneable handle to the broker session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        collaborators: Collaborators,
        policy: ExpiryPolicy,
        clock: Arc<dyn Clock>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger: collaborators.ledger,
                cache: collaborators.cache,
                credentials: collaborators.credentials,
                authenticator: collaborators.authenticator,
                exchanger: collaborators.exchanger,
                policy,
                clock,
                settings,
                single_flight: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Seeds the `NOT_ATTEMPTED` record if none exists. Safe to call on
    /// every startup.
    pub async fn initialize(&self) -> Result<bool, StoreError> {
        let created = self.inner.ledger.seed_default().await?;
        if created {
            info!("Seeded broker session status record");
        } else {
            debug!("Broker session status record already present");
        }
        Ok(created)
    }

    /// Current status record.
    pub async fn status(&self) -> Result<StatusRecord, StoreError> {
        self.inner.ledger.get().await
    }

    /// Asks the next `acquire_token` call to log in again even if the cached
    /// token is still valid.
    pub async fn request_renewal(&self) -> Result<(), StoreError> {
        self.inner.ledger.set(StatusUpdate::force_renew(true)).await?;
        info!("Forced renewal requested");
        Ok(())
    }

    /// Whether `record` describes a usable token right now.
    pub fn token_valid(&self, record: &StatusRecord) -> bool {
        self.inner.policy.is_valid(record, self.inner.clock.now())
    }

    /// When the token recorded by `record` expires, if there is one.
    pub fn expires_at(&self, record: &StatusRecord) -> Option<DateTime<Utc>> {
        match (record.state, record.fetched_at) {
            (LoginState::Success, Some(fetched_at)) => Some(self.inner.policy.expires_at(fetched_at)),
            _ => None,
        }
    }

    /// Pings the ledger and the cache.
    pub async fn health(&self) -> HealthReport {
        let (ledger, cache) = tokio::join!(self.inner.ledger.ping(), self.inner.cache.ping());
        HealthReport {
            ledger: ledger.into(),
            cache: cache.into(),
        }
    }

    /// Returns a valid broker token, logging in again if needed.
    ///
    /// Once a renewal has started it runs to completion on its own task, so
    /// dropping the returned future never leaves the ledger `IN_PROGRESS`.
    pub async fn acquire_token(&self) -> Result<AccessToken, SessionError> {
        let flight = self.inner.single_flight.clone().lock_owned().await;

        let record = match self.inner.ledger.get().await {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                return Err(SessionError::ConfigMissing(
                    "broker session status record has not been initialized".to_string(),
                ));
            }
            Err(e) => {
                error!(error = %e, "Failed to read status ledger");
                let cause = LoginError::StorageUnavailable(format!("reading status: {}", e));
                return Err(self.inner.record_failure(cause).await);
            }
        };

        let credentials = match self.inner.credentials.load().await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                return Err(SessionError::ConfigMissing(
                    "broker credentials are not configured".to_string(),
                ));
            }
            Err(e) => {
                error!(error = %e, "Failed to load broker credentials");
                let cause = LoginError::StorageUnavailable(format!("reading credentials: {:#}", e));
                return Err(self.inner.record_failure(cause).await);
            }
        };

        if let Some(token) = self.inner.usable_token(&record).await {
            debug!("Serving cached broker token");
            return Ok(token);
        }

        let record = if record.state == LoginState::InProgress && self.inner.is_fresh_lock(&record) {
            match self.inner.wait_for_foreign(record).await {
                Settled::Token(token) => return Ok(token),
                Settled::StillRunning => return Err(SessionError::RenewalInProgress),
                Settled::Unusable(record) if record.state != LoginState::InProgress => {
                    return Err(SessionError::LoginFailed(LoginError::ConcurrentAttempt(
                        record.message,
                    )));
                }
                Settled::Unusable(record) => record,
            }
        } else {
            record
        };

        if record.state == LoginState::InProgress {
            warn!(
                attempt_id = ?record.attempt_id,
                updated_at = %record.updated_at,
                "Taking over abandoned renewal"
            );
        }

        let inner = self.inner.clone();
        let force_renew = record.force_renew;
        let renewal = tokio::spawn(async move {
            let _flight = flight;
            inner.renew(force_renew, credentials).await
        });

        match renewal.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Renewal task did not complete");
                let cause = LoginError::RenewalAborted(e.to_string());
                Err(self.inner.record_failure(cause).await)
            }
        }
    }
}

impl Inner {
    /// The cached token, if the fast path applies to `record`.
    async fn usable_token(&self, record: &StatusRecord) -> Option<AccessToken> {
        if record.force_renew || !self.policy.is_valid(record, self.clock.now()) {
            return None;
        }

        match self.cache.get().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Token cache read failed, renewing");
                None
            }
        }
    }

    fn is_fresh_lock(&self, record: &StatusRecord) -> bool {
        let age = (self.clock.now() - record.updated_at)
            .to_std()
            .unwrap_or_default();
        age < self.settings.stale_after
    }

    /// Polls the ledger until a foreign renewal leaves `IN_PROGRESS`.
    async fn wait_for_foreign(&self, mut record: StatusRecord) -> Settled {
        info!(
            attempt_id = ?record.attempt_id,
            "Another renewal is in progress, waiting for it"
        );
        let deadline = tokio::time::Instant::now() + self.settings.wait_timeout;

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Settled::StillRunning;
            }
            tokio::time::sleep(self.settings.poll_interval).await;

            match self.ledger.get().await {
                Ok(latest) => record = latest,
                Err(e) => {
                    warn!(error = %e, "Status poll failed");
                    continue;
                }
            }

            if record.state == LoginState::InProgress {
                if self.is_fresh_lock(&record) {
                    continue;
                }
                // Holder went quiet past the stale bound
                return Settled::Unusable(record);
            }

            return match self.usable_token(&record).await {
                Some(token) => Settled::Token(token),
                None => Settled::Unusable(record),
            };
        }
    }

    async fn renew(
        &self,
        force_renew: bool,
        credentials: BrokerCredentials,
    ) -> Result<AccessToken, SessionError> {
        let attempt_id = Uuid::new_v4().to_string();
        let message = if force_renew {
            "Forced renewal requested, logging in to broker."
        } else {
            "No valid token, logging in to broker."
        };

        let started = StatusUpdate::transition(LoginState::InProgress, message, self.clock.now())
            .with_attempt(Some(attempt_id.clone()));
        if let Err(e) = self.ledger.set(started).await {
            error!(error = %e, "Failed to mark renewal in progress");
            let cause = LoginError::StorageUnavailable(format!("marking renewal started: {}", e));
            return Err(self.record_failure(cause).await);
        }
        info!(attempt_id = %attempt_id, force_renew, "Broker renewal started");

        match self.login_and_exchange(&credentials).await {
            Ok(token) => self.record_success(token, force_renew).await,
            Err(cause) => {
                warn!(attempt_id = %attempt_id, error = %cause, "Broker renewal failed");
                Err(self.record_failure(cause).await)
            }
        }
    }

    async fn login_and_exchange(
        &self,
        credentials: &BrokerCredentials,
    ) -> Result<AccessToken, LoginError> {
        let timeout = self.settings.login_timeout;
        let code = match tokio::time::timeout(
            timeout,
            self.authenticator.login(credentials, timeout),
        )
        .await
        {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => return Err(LoginError::AuthenticationFailed(format!("{:#}", e))),
            Err(_) => {
                return Err(LoginError::AuthenticationFailed(format!(
                    "login did not finish within {}s",
                    timeout.as_secs()
                )));
            }
        };

        self.exchanger
            .exchange(&code, credentials)
            .await
            .map_err(|e| LoginError::ExchangeFailed(format!("{:#}", e)))
    }

    async fn record_success(
        &self,
        token: AccessToken,
        force_renew: bool,
    ) -> Result<AccessToken, SessionError> {
        let fetched_at = self.clock.now();

        if let Err(e) = self.cache.set(&token).await {
            error!(error = %e, "Failed to cache broker token");
            let cause = LoginError::StorageUnavailable(format!("caching token: {}", e));
            return Err(self.record_failure(cause).await);
        }

        let done = StatusUpdate::transition(
            LoginState::Success,
            "Successfully logged in and acquired access token.",
            fetched_at,
        )
        .with_fetched_at(fetched_at)
        .with_force_renew(false)
        .with_attempt(None);

        if let Err(e) = self.ledger.set(done).await {
            error!(error = %e, "Failed to record successful renewal");
            let cause = LoginError::StorageUnavailable(format!("recording success: {}", e));
            return Err(self.record_failure(cause).await);
        }

        info!(
            expires_at = %self.policy.expires_at(fetched_at),
            "Broker token renewed"
        );
        Ok(token)
    }

    /// Best-effort `FAILED` write. Leaves `force_renew` as the ledger has it,
    /// including a request made while the attempt was running.
    async fn record_failure(&self, cause: LoginError) -> SessionError {
        let update = StatusUpdate::transition(
            LoginState::Failed,
            format!("Login failed: {}", cause),
            self.clock.now(),
        )
        .with_attempt(None);

        match self.ledger.set(update).await {
            Ok(()) => SessionError::LoginFailed(cause),
            Err(update) => {
                error!(error = %update, "Failed to record renewal failure");
                SessionError::StatusUpdateFailed { cause, update }
            }
        }
    }
}
