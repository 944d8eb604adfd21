//! Broker OAuth endpoints.

use crate::credentials::BrokerCredentials;
use serde::{Deserialize, Serialize};

/// Where the broker's login dialog and token endpoint live.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerEndpoints {
    /// Authorization dialog the login helper opens
    pub authorize_url: String,

    /// Token exchange endpoint
    pub token_url: String,

    /// Value of the `Api-Version` header sent on exchange
    pub api_version: String,
}

impl Default for BrokerEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: "https://api-v2.upstox.com/login/authorization/dialog".to_string(),
            token_url: "https://api-v2.upstox.com/login/authorization/token".to_string(),
            api_version: "2.0".to_string(),
        }
    }
}

/// Builds the authorization dialog URL for an authorization-code login.
pub fn authorization_url(authorize_url: &str, credentials: &BrokerCredentials) -> String {
    format!(
        "{}?response_type=code&client_id={}&redirect_uri={}",
        authorize_url,
        urlencoding::encode(&credentials.api_key),
        urlencoding::encode(&credentials.redirect_uri),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_url_encodes_parameters() {
        let creds = BrokerCredentials {
            api_key: "abc 123".to_string(),
            secret_key: "s".to_string(),
            redirect_uri: "https://www.example.com/cb?x=1".to_string(),
            totp_key: "t".to_string(),
            mobile_no: "m".to_string(),
            pin: "p".to_string(),
        };

        let url = authorization_url("https://broker.test/dialog", &creds);

        assert!(url.starts_with("https://broker.test/dialog?response_type=code"));
        assert!(url.contains("client_id=abc%20123"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fwww.example.com%2Fcb%3Fx%3D1"));
        assert!(!url.contains("client_secret"));
    }
}
