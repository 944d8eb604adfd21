//! Operations API for the broker session.
//!
//! | Method | Path | Admin |
//! |---|---|---|
//! | GET | `/api/session/status` | no |
//! | GET | `/api/session/health` | no |
//! | POST | `/api/session/force-renew` | yes |
//! | POST | `/api/session/renew` | yes |
//! | PUT | `/api/session/credentials` | yes |
//! | DELETE | `/api/session/credentials` | yes |
//!
//! No response ever contains the access token or a credential secret.

use crate::credentials::{BrokerCredentials, CredentialStore, DEFAULT_PROFILE};
use crate::error::{LoginError, SessionError, StoreError};
use crate::ledger::StatusRecord;
use crate::manager::SessionManager;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for session endpoints
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    ServerError(String),
    BadGateway(String),
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => {
                AppError::NotFound("Session status has not been initialized".to_string())
            }
            StoreError::Unavailable(_) => AppError::Unavailable(err.to_string()),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match &err {
            SessionError::ConfigMissing(_) | SessionError::RenewalInProgress => {
                AppError::Conflict(err.to_string())
            }
            SessionError::LoginFailed(LoginError::StorageUnavailable(_))
            | SessionError::StatusUpdateFailed { .. } => AppError::Unavailable(err.to_string()),
            SessionError::LoginFailed(LoginError::RenewalAborted(_)) => {
                AppError::ServerError(err.to_string())
            }
            SessionError::LoginFailed(_) => AppError::BadGateway(err.to_string()),
        }
    }
}

/// Shared application state for the session API
#[derive(Clone)]
pub struct SessionAppState {
    pub manager: SessionManager,
    pub credential_store: Arc<CredentialStore>,
    /// Required bearer token for mutating routes. None = unrestricted.
    pub admin_token: Option<String>,
}

/// Status record plus derived validity
#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    record: StatusRecord,
    token_valid: bool,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct ActionResponse {
    success: bool,
    message: String,
}

pub fn create_session_router(state: SessionAppState) -> Router {
    Router::new()
        .route("/api/session/status", get(get_status))
        .route("/api/session/health", get(get_health))
        .route("/api/session/force-renew", post(force_renew))
        .route("/api/session/renew", post(renew_now))
        .route(
            "/api/session/credentials",
            put(put_credentials).delete(delete_credentials),
        )
        .with_state(Arc::new(state))
}

/// GET /api/session/status
async fn get_status(State(state): State<Arc<SessionAppState>>) -> Result<Json<StatusResponse>, AppError> {
    let record = state.manager.status().await?;
    let token_valid = state.manager.token_valid(&record);
    let expires_at = state.manager.expires_at(&record);

    Ok(Json(StatusResponse {
        record,
        token_valid,
        expires_at,
    }))
}

/// GET /api/session/health
async fn get_health(State(state): State<Arc<SessionAppState>>) -> Response {
    let report = state.manager.health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

/// POST /api/session/force-renew
///
/// Only sets the flag; the next renewal (scheduled or explicit) logs in.
async fn force_renew(
    State(state): State<Arc<SessionAppState>>,
    headers: HeaderMap,
) -> Result<Json<ActionResponse>, AppError> {
    require_admin(&headers, &state.admin_token)?;

    state.manager.request_renewal().await?;

    Ok(Json(ActionResponse {
        success: true,
        message: "Renewal will be forced on the next attempt.".to_string(),
    }))
}

/// POST /api/session/renew
async fn renew_now(
    State(state): State<Arc<SessionAppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    require_admin(&headers, &state.admin_token)?;

    if let Err(e) = state.manager.acquire_token().await {
        warn!(error = %e, "Manual renewal failed");
        return Err(e.into());
    }

    get_status(State(state)).await
}

/// PUT /api/session/credentials
async fn put_credentials(
    State(state): State<Arc<SessionAppState>>,
    headers: HeaderMap,
    Json(credentials): Json<BrokerCredentials>,
) -> Result<Json<ActionResponse>, AppError> {
    require_admin(&headers, &state.admin_token)?;

    if let Some(field) = first_blank_field(&credentials) {
        return Err(AppError::BadRequest(format!("'{}' must not be empty", field)));
    }

    state
        .credential_store
        .store(DEFAULT_PROFILE, &credentials)
        .map_err(|e| {
            error!(error = %e, "Failed to store broker credentials");
            AppError::ServerError("Failed to store credentials".to_string())
        })?;

    info!(api_key = %credentials.api_key, "Broker credentials updated");

    Ok(Json(ActionResponse {
        success: true,
        message: "Broker credentials stored.".to_string(),
    }))
}

/// DELETE /api/session/credentials
///
/// Later renewals fail with a configuration error until new credentials are stored.
async fn delete_credentials(
    State(state): State<Arc<SessionAppState>>,
    headers: HeaderMap,
) -> Result<Json<ActionResponse>, AppError> {
    require_admin(&headers, &state.admin_token)?;

    let removed = state
        .credential_store
        .delete(DEFAULT_PROFILE)
        .map_err(|e| {
            error!(error = %e, "Failed to delete broker credentials");
            AppError::ServerError("Failed to delete credentials".to_string())
        })?;

    if !removed {
        return Err(AppError::NotFound("No broker credentials stored".to_string()));
    }

    info!("Broker credentials removed");

    Ok(Json(ActionResponse {
        success: true,
        message: "Broker credentials removed.".to_string(),
    }))
}

fn first_blank_field(credentials: &BrokerCredentials) -> Option<&'static str> {
    [
        ("api_key", &credentials.api_key),
        ("secret_key", &credentials.secret_key),
        ("redirect_uri", &credentials.redirect_uri),
        ("totp_key", &credentials.totp_key),
        ("mobile_no", &credentials.mobile_no),
        ("pin", &credentials.pin),
    ]
    .into_iter()
    .find(|(_, value)| value.trim().is_empty())
    .map(|(name, _)| name)
}

fn require_admin(headers: &HeaderMap, expected: &Option<String>) -> Result<(), AppError> {
    if validate_admin_token(headers, expected) {
        Ok(())
    } else {
        Err(AppError::Unauthorized("Unauthorized".to_string()))
    }
}

/// Returns true if the bearer token in `Authorization` matches the expected admin token.
/// Returns true (no restriction) when `expected` is None.
fn validate_admin_token(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected_token) = expected else {
        return true;
    };

    let Some(auth_header) = headers.get("Authorization") else {
        return false;
    };
    let Ok(value) = auth_header.to_str() else {
        return false;
    };
    let Some(token) = value.strip_prefix("Bearer ") else {
        return false;
    };

    token.trim() == expected_token
}
