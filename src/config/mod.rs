use crate::cache::DEFAULT_TOKEN_KEY;
use crate::login::BrokerEndpoints;
use crate::manager::ManagerSettings;
use crate::policy::ExpiryPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Complete broker session configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub expiry: ExpiryConfig,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl SessionConfig {
    /// Orchestrator timing derived from the `login` and `lock` sections.
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            login_timeout: Duration::from_secs(self.login.timeout_seconds),
            stale_after: Duration::from_secs(self.lock.stale_after_seconds),
            wait_timeout: Duration::from_secs(self.lock.wait_timeout_seconds),
            poll_interval: Duration::from_millis(self.lock.poll_interval_millis),
        }
    }

    /// Applies `BROKER_SESSION_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("BROKER_SESSION_API_PORT") {
            self.api.port = port
                .parse()
                .with_context(|| format!("BROKER_SESSION_API_PORT '{}' is not a port", port))?;
        }
        if let Some(url) = lookup("BROKER_SESSION_REDIS_URL") {
            self.cache.backend = CacheBackend::Redis;
            self.cache.redis_url = url;
        }
        Ok(())
    }
}

/// Broker endpoints plus the exchange request bound
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(flatten)]
    pub endpoints: BrokerEndpoints,
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_seconds: u64,
}

fn default_exchange_timeout() -> u64 {
    30
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoints: BrokerEndpoints::default(),
            exchange_timeout_seconds: default_exchange_timeout(),
        }
    }
}

/// Daily token rollover
#[derive(Debug, Clone, Deserialize)]
pub struct ExpiryConfig {
    /// IANA timezone of the exchange
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Local wall-clock time tokens expire at (HH:MM[:SS])
    #[serde(default = "default_rollover")]
    pub rollover: String,
}

fn default_timezone() -> String {
    "Asia/Kolkata".to_string()
}

fn default_rollover() -> String {
    "03:30:00".to_string()
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            rollover: default_rollover(),
        }
    }
}

impl ExpiryConfig {
    pub fn policy(&self) -> Result<ExpiryPolicy> {
        ExpiryPolicy::parse(&self.rollover, &self.timezone)
    }
}

/// Interactive login helper
#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    #[serde(default = "default_login_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_login_timeout")]
    pub timeout_seconds: u64,
}

fn default_login_command() -> String {
    "broker-login".to_string()
}

fn default_login_timeout() -> u64 {
    120
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            command: default_login_command(),
            args: Vec::new(),
            timeout_seconds: default_login_timeout(),
        }
    }
}

/// Cross-process renewal lock
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: u64,
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_seconds: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_millis: u64,
}

fn default_stale_after() -> u64 {
    600
}

fn default_wait_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    500
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_seconds: default_stale_after(),
            wait_timeout_seconds: default_wait_timeout(),
            poll_interval_millis: default_poll_interval(),
        }
    }
}

/// SQLite file locations
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,
}

fn default_ledger_path() -> String {
    "session.db".to_string()
}

fn default_credentials_path() -> String {
    "credentials.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            credentials_path: default_credentials_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

/// Token cache backend
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_token_key")]
    pub token_key: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_token_key() -> String {
    DEFAULT_TOKEN_KEY.to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            redis_url: default_redis_url(),
            token_key: default_token_key(),
        }
    }
}

/// Periodic renewal
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_scheduler_interval")]
    pub interval_seconds: u64,
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_scheduler_interval() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval_seconds: default_scheduler_interval(),
        }
    }
}

/// HTTP API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    3002
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SessionConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: SessionConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields defaults.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<SessionConfig> {
    if path.as_ref().exists() {
        load_config(path)
    } else {
        Ok(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(
            config.broker.endpoints.token_url,
            "https://api-v2.upstox.com/login/authorization/token"
        );
        assert_eq!(config.broker.endpoints.api_version, "2.0");
        assert_eq!(config.broker.exchange_timeout_seconds, 30);
        assert_eq!(config.login.command, "broker-login");
        assert_eq!(config.login.timeout_seconds, 120);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.token_key, "system:access_token");
        assert_eq!(config.scheduler.interval_seconds, 300);
        assert_eq!(config.api.port, 3002);
        assert_eq!(config.expiry.policy().unwrap(), ExpiryPolicy::default());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
            [broker]
            token_url = "https://broker.test/token"

            [login]
            command = "/opt/login/run.sh"
            args = ["--headless"]
            timeout_seconds = 90

            [cache]
            backend = "redis"
            redis_url = "redis://cache:6379/2"

            [lock]
            poll_interval_millis = 250
        "#;

        let config: SessionConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.broker.endpoints.token_url, "https://broker.test/token");
        // Unset keys in a present section keep their defaults
        assert_eq!(
            config.broker.endpoints.authorize_url,
            "https://api-v2.upstox.com/login/authorization/dialog"
        );
        assert_eq!(config.login.args, vec!["--headless".to_string()]);
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(config.cache.token_key, "system:access_token");

        let settings = config.manager_settings();
        assert_eq!(settings.login_timeout, Duration::from_secs(90));
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.stale_after, Duration::from_secs(600));
    }

    #[test]
    fn test_invalid_expiry_rejected() {
        let toml = r#"
            [expiry]
            timezone = "Mars/Olympus_Mons"
        "#;
        let config: SessionConfig = toml::from_str(toml).unwrap();
        assert!(config.expiry.policy().is_err());

        let toml = r#"
            [expiry]
            rollover = "25:99"
        "#;
        let config: SessionConfig = toml::from_str(toml).unwrap();
        assert!(config.expiry.policy().is_err());
    }

    #[test]
    fn test_unknown_cache_backend_rejected() {
        let toml = r#"
            [cache]
            backend = "memcached"
        "#;
        assert!(toml::from_str::<SessionConfig>(toml).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BROKER_SESSION_API_PORT", "8088"),
            ("BROKER_SESSION_REDIS_URL", "redis://override:6379/0"),
        ]
        .into_iter()
        .collect();

        let mut config = SessionConfig::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.api.port, 8088);
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(config.cache.redis_url, "redis://override:6379/0");

        let mut config = SessionConfig::default();
        assert!(config
            .apply_overrides(|name| (name == "BROKER_SESSION_API_PORT").then(|| "http".to_string()))
            .is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker-session.toml");
        std::fs::write(&path, "[api]\nport = 4000\n").unwrap();

        assert_eq!(load_config(&path).unwrap().api.port, 4000);
        assert_eq!(
            load_config_or_default(dir.path().join("missing.toml"))
                .unwrap()
                .api
                .port,
            3002
        );
        assert!(load_config(dir.path().join("missing.toml")).is_err());
    }
}
