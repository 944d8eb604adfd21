//! Login through an external helper program.
//!
//! The broker only offers an interactive browser login, so the actual page
//! automation lives in a helper (for example a headless-browser script). The
//! helper receives everything through environment variables, never argv:
//!
//! | Variable | Content |
//! |---|---|
//! | `BROKER_AUTH_URL` | Authorization dialog URL to open |
//! | `BROKER_REDIRECT_URI` | Callback address to watch for |
//! | `BROKER_API_KEY` | OAuth client id |
//! | `BROKER_MOBILE_NO` | Account identifier |
//! | `BROKER_PIN` | Account PIN |
//! | `BROKER_TOTP_KEY` | TOTP seed for the one-time password |
//! | `BROKER_LOGIN_TIMEOUT_SECS` | Budget the caller will enforce |
//!
//! It prints the final redirect URL (or just the code) as its last line of
//! stdout and exits 0.

use super::{authorization_url, Authenticator};
use crate::credentials::BrokerCredentials;
use crate::token::AuthorizationCode;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info};

/// Query parameters the broker appends to the redirect.
#[derive(Deserialize, Debug)]
struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Runs a login helper program per attempt.
pub struct CommandAuthenticator {
    program: String,
    args: Vec<String>,
    authorize_url: String,
}

impl CommandAuthenticator {
    pub fn new(program: impl Into<String>, args: Vec<String>, authorize_url: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            authorize_url: authorize_url.into(),
        }
    }
}

#[async_trait]
impl Authenticator for CommandAuthenticator {
    async fn login(
        &self,
        credentials: &BrokerCredentials,
        timeout: Duration,
    ) -> Result<AuthorizationCode> {
        let auth_url = authorization_url(&self.authorize_url, credentials);

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .env("BROKER_AUTH_URL", &auth_url)
            .env("BROKER_REDIRECT_URI", &credentials.redirect_uri)
            .env("BROKER_API_KEY", &credentials.api_key)
            .env("BROKER_MOBILE_NO", &credentials.mobile_no)
            .env("BROKER_PIN", &credentials.pin)
            .env("BROKER_TOTP_KEY", &credentials.totp_key)
            .env("BROKER_LOGIN_TIMEOUT_SECS", timeout.as_secs().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Timeout cancels by dropping this future; take the helper down with it
            .kill_on_drop(true);

        info!(program = %self.program, "Launching login helper");

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to start login helper '{}'", self.program))?;
        let output = child
            .wait_with_output()
            .await
            .context("Login helper did not complete")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Login helper exited with {}: {}",
                output.status,
                last_line(&stderr).unwrap_or("<no output>")
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let code = parse_login_output(&stdout, &credentials.redirect_uri)?;
        debug!("Authorization code captured");
        Ok(code)
    }
}

fn last_line(s: &str) -> Option<&str> {
    s.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

/// Extracts the authorization code from a login helper's stdout.
///
/// Accepts, on the last non-empty line, either the full redirect URL
/// (which must point at `redirect_uri`) or the bare code.
pub fn parse_login_output(stdout: &str, redirect_uri: &str) -> Result<AuthorizationCode> {
    let line = last_line(stdout).ok_or_else(|| anyhow!("Login helper produced no output"))?;

    if line.contains("://") {
        let url = reqwest::Url::parse(line).context("Login helper printed an invalid URL")?;
        let expected =
            reqwest::Url::parse(redirect_uri).context("Configured redirect_uri is not a URL")?;
        if !same_origin(&url, &expected) {
            bail!("Login finished at an unexpected address (host {:?})", url.host_str());
        }
        return code_from_query(url.query().unwrap_or(""));
    }

    if line.contains("code=") || line.contains("error=") {
        return code_from_query(line.trim_start_matches('?'));
    }

    if line.chars().any(char::is_whitespace) {
        bail!("Login helper output is not an authorization code");
    }
    Ok(AuthorizationCode::new(line))
}

fn same_origin(a: &reqwest::Url, b: &reqwest::Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

fn code_from_query(query: &str) -> Result<AuthorizationCode> {
    let callback: CallbackQuery =
        serde_urlencoded::from_str(query).context("Malformed redirect query")?;

    if let Some(error) = callback.error {
        bail!(
            "Broker rejected the login: {} - {}",
            error,
            callback
                .error_description
                .unwrap_or_else(|| "no description".to_string())
        );
    }

    match callback.code {
        Some(code) if !code.is_empty() => Ok(AuthorizationCode::new(code)),
        _ => Err(anyhow!("Failed to obtain authorization code from redirect")),
    }
}
