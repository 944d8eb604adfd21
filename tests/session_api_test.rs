// Integration tests for the /api/session routes

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use broker_session::api::{create_session_router, SessionAppState};
use broker_session::cache::{MemoryTokenCache, TokenCache};
use broker_session::clock::SystemClock;
use broker_session::credentials::{BrokerCredentials, CredentialStore, DEFAULT_PROFILE};
use broker_session::ledger::SqliteStatusLedger;
use broker_session::login::{Authenticator, BrokerEndpoints, HttpTokenExchanger};
use broker_session::policy::ExpiryPolicy;
use broker_session::token::AuthorizationCode;
use broker_session::{Collaborators, ManagerSettings, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct FixedLogin;

#[async_trait]
impl Authenticator for FixedLogin {
    async fn login(
        &self,
        _credentials: &BrokerCredentials,
        _timeout: Duration,
    ) -> anyhow::Result<AuthorizationCode> {
        Ok(AuthorizationCode::new("auth-code"))
    }
}

struct TestApp {
    state: SessionAppState,
    cache: Arc<MemoryTokenCache>,
}

impl TestApp {
    fn router(&self) -> Router {
        create_session_router(self.state.clone())
    }
}

async fn create_test_app(token_url: &str, admin_token: Option<&str>) -> TestApp {
    let key = BASE64.encode([9u8; 32]);
    let credential_store = Arc::new(CredentialStore::new(":memory:", &key).unwrap());
    let cache = Arc::new(MemoryTokenCache::new());
    let endpoints = BrokerEndpoints {
        token_url: token_url.to_string(),
        ..BrokerEndpoints::default()
    };

    let manager = SessionManager::new(
        Collaborators {
            ledger: Arc::new(SqliteStatusLedger::new(":memory:").unwrap()),
            cache: cache.clone(),
            credentials: credential_store.clone(),
            authenticator: Arc::new(FixedLogin),
            exchanger: Arc::new(HttpTokenExchanger::new(endpoints, Duration::from_secs(5)).unwrap()),
        },
        ExpiryPolicy::default(),
        Arc::new(SystemClock),
        ManagerSettings::default(),
    );
    manager.initialize().await.unwrap();

    TestApp {
        state: SessionAppState {
            manager,
            credential_store,
            admin_token: admin_token.map(|t| t.to_string()),
        },
        cache,
    }
}

fn credentials_json() -> serde_json::Value {
    serde_json::json!({
        "api_key": "client-id",
        "secret_key": "client-secret",
        "redirect_uri": "https://www.example.com",
        "totp_key": "JBSWY3DPEHPK3PXP",
        "mobile_no": "9876543210",
        "pin": "123456"
    })
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

/// GET /api/session/status reports the seeded record.
#[tokio::test]
async fn test_status_after_seed() {
    let app = create_test_app("http://127.0.0.1:9/token", None).await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/session/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["state"], "NOT_ATTEMPTED");
    assert_eq!(json["message"], "System has not attempted to log in yet.");
    assert_eq!(json["force_renew"], false);
    assert_eq!(json["token_valid"], false);
    assert!(json["expires_at"].is_null());
}

/// POST /api/session/force-renew requires the admin token.
#[tokio::test]
async fn test_force_renew_requires_admin() {
    let app = create_test_app("http://127.0.0.1:9/token", Some("secret")).await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/session/force-renew")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/session/force-renew")
                .header("Authorization", bearer("secret"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let record = app.state.manager.status().await.unwrap();
    assert!(record.force_renew);
}

/// PUT /api/session/credentials stores without echoing secrets.
#[tokio::test]
async fn test_put_credentials_does_not_echo_secrets() {
    let app = create_test_app("http://127.0.0.1:9/token", Some("secret")).await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/session/credentials")
                .header("Authorization", bearer("secret"))
                .header("Content-Type", "application/json")
                .body(Body::from(credentials_json().to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(!text.contains("client-secret"));
    assert!(!text.contains("123456"));
    assert!(!text.contains("JBSWY3DPEHPK3PXP"));

    let stored = app
        .state
        .credential_store
        .get(DEFAULT_PROFILE)
        .unwrap()
        .unwrap();
    assert_eq!(stored.api_key, "client-id");
}

/// DELETE /api/session/credentials removes the stored profile once.
#[tokio::test]
async fn test_delete_credentials() {
    let app = create_test_app("http://127.0.0.1:9/token", Some("secret")).await;
    let credentials: BrokerCredentials = serde_json::from_value(credentials_json()).unwrap();
    app.state
        .credential_store
        .store(DEFAULT_PROFILE, &credentials)
        .unwrap();

    let delete = |auth: Option<&str>| {
        let mut builder = Request::builder()
            .method("DELETE")
            .uri("/api/session/credentials");
        if let Some(token) = auth {
            builder = builder.header("Authorization", bearer(token));
        }
        builder.body(Body::empty()).unwrap()
    };

    let response = app.router().oneshot(delete(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.router().oneshot(delete(Some("secret"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app
        .state
        .credential_store
        .get(DEFAULT_PROFILE)
        .unwrap()
        .is_none());

    let response = app.router().oneshot(delete(Some("secret"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Blank credential fields are rejected.
#[tokio::test]
async fn test_put_credentials_rejects_blank_fields() {
    let app = create_test_app("http://127.0.0.1:9/token", None).await;
    let mut body = credentials_json();
    body["pin"] = serde_json::json!("");

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/session/credentials")
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app
        .state
        .credential_store
        .get(DEFAULT_PROFILE)
        .unwrap()
        .is_none());
}

/// POST /api/session/renew without credentials is a conflict, not a login.
#[tokio::test]
async fn test_renew_without_credentials() {
    let app = create_test_app("http://127.0.0.1:9/token", None).await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/session/renew")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("credentials are not configured"));
}

/// Full round trip: store credentials, renew against a mock broker, read status.
#[tokio::test]
async fn test_renew_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"broker-token-xyz"}"#)
        .create_async()
        .await;

    let app = create_test_app(&format!("{}/token", server.url()), None).await;
    let credentials: BrokerCredentials = serde_json::from_value(credentials_json()).unwrap();
    app.state
        .credential_store
        .store(DEFAULT_PROFILE, &credentials)
        .unwrap();

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/session/renew")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(!text.contains("broker-token-xyz"));

    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["state"], "SUCCESS");
    assert_eq!(json["token_valid"], true);
    assert!(json["expires_at"].is_string());
    assert!(json["fetched_at"].is_string());

    let cached = app.cache.get().await.unwrap().unwrap();
    assert_eq!(cached.as_str(), "broker-token-xyz");
    mock.assert_async().await;
}

/// A broker rejection surfaces as 502 and is recorded as FAILED.
#[tokio::test]
async fn test_renew_broker_rejection() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/token")
        .with_status(400)
        .with_body(r#"{"status":"error"}"#)
        .create_async()
        .await;

    let app = create_test_app(&format!("{}/token", server.url()), None).await;
    let credentials: BrokerCredentials = serde_json::from_value(credentials_json()).unwrap();
    app.state
        .credential_store
        .store(DEFAULT_PROFILE, &credentials)
        .unwrap();

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/session/renew")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let record = app.state.manager.status().await.unwrap();
    assert_eq!(record.state.as_str(), "FAILED");
}

/// GET /api/session/health pings both stores.
#[tokio::test]
async fn test_health() {
    let app = create_test_app("http://127.0.0.1:9/token", None).await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/session/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ledger"]["ok"], true);
    assert_eq!(json["cache"]["ok"], true);
}
