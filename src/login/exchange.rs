//! Authorization code exchange against the broker's token endpoint.

use super::{BrokerEndpoints, TokenExchanger};
use crate::credentials::BrokerCredentials;
use crate::token::{AccessToken, AuthorizationCode};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Form body of the exchange request
#[derive(Serialize)]
struct TokenRequest<'a> {
    code: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    redirect_uri: &'a str,
    grant_type: &'a str,
}

/// The broker returns a full profile; only the token matters here.
#[derive(Deserialize, Debug)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// Exchanges codes over HTTP with a bounded request time.
pub struct HttpTokenExchanger {
    client: reqwest::Client,
    endpoints: BrokerEndpoints,
}

impl HttpTokenExchanger {
    pub fn new(endpoints: BrokerEndpoints, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, endpoints })
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange(
        &self,
        code: &AuthorizationCode,
        credentials: &BrokerCredentials,
    ) -> Result<AccessToken> {
        let form = TokenRequest {
            code: code.as_str(),
            client_id: &credentials.api_key,
            client_secret: &credentials.secret_key,
            redirect_uri: &credentials.redirect_uri,
            grant_type: "authorization_code",
        };

        tracing::debug!("Exchanging authorization code at {}", self.endpoints.token_url);

        let response = self
            .client
            .post(&self.endpoints.token_url)
            .header("Accept", "application/json")
            .header("Api-Version", &self.endpoints.api_version)
            .form(&form)
            .send()
            .await
            .context("Failed to send token exchange request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Token exchange failed with status {}: {}",
                status,
                body
            ));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        match token_response.access_token {
            Some(token) if !token.is_empty() => Ok(AccessToken::new(token)),
            _ => Err(anyhow!("No access token in broker's response")),
        }
    }
}
