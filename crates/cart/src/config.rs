//! Cart engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `CART_API_BASE_URL` - Remote cart API base (default: `http://localhost:8080/api/v1`)
//! - `CART_API_TOKEN` - Bearer token for the remote cart; unset means guest session
//! - `CART_SNAPSHOT_DIR` - Directory for the local cart snapshot (default: `.cart`)
//! - `CART_SNAPSHOT_SLOT` - Snapshot slot name (default: `d4k-cart-storage`)
//! - `CART_SYNC_TIMEOUT_SECS` - Deadline for one reconciliation (default: 10)
//! - `CART_HTTP_TIMEOUT_SECS` - Per-request HTTP timeout (default: 10)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::persistence::DEFAULT_SLOT;

const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/v1";
const DEFAULT_SNAPSHOT_DIR: &str = ".cart";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart engine configuration.
#[derive(Debug, Clone)]
pub struct CartConfig {
    /// Remote cart API configuration
    pub remote: RemoteCartConfig,
    /// Directory holding the local snapshot file
    pub snapshot_dir: PathBuf,
    /// Snapshot slot name
    pub snapshot_slot: String,
    /// Deadline for one full reconciliation
    pub sync_timeout: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

/// Remote cart API configuration.
///
/// Implements `Debug` manually to redact the token.
#[derive(Clone)]
pub struct RemoteCartConfig {
    /// Base URL the cart endpoints hang off
    pub base_url: Url,
    /// Bearer token; `None` for a guest session
    pub token: Option<SecretString>,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl std::fmt::Debug for RemoteCartConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCartConfig")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl CartConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let remote = RemoteCartConfig::from_env()?;
        let snapshot_dir =
            PathBuf::from(get_env_or_default("CART_SNAPSHOT_DIR", DEFAULT_SNAPSHOT_DIR));
        let snapshot_slot = get_env_or_default("CART_SNAPSHOT_SLOT", DEFAULT_SLOT);
        let sync_timeout = get_duration_secs("CART_SYNC_TIMEOUT_SECS")?;
        let sentry_dsn = get_optional_env("SENTRY_DSN");

        Ok(Self {
            remote,
            snapshot_dir,
            snapshot_slot,
            sync_timeout,
            sentry_dsn,
        })
    }
}

impl RemoteCartConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let base_url = parse_base_url(
            "CART_API_BASE_URL",
            &get_env_or_default("CART_API_BASE_URL", DEFAULT_BASE_URL),
        )?;

        Ok(Self {
            base_url,
            token: get_optional_env("CART_API_TOKEN")
                .filter(|t| !t.trim().is_empty())
                .map(SecretString::from),
            request_timeout: get_duration_secs("CART_HTTP_TIMEOUT_SECS")?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse a positive number of seconds, defaulting when unset.
fn get_duration_secs(key: &str) -> Result<Duration, ConfigError> {
    let raw = get_env_or_default(key, &DEFAULT_TIMEOUT_SECS.to_string());
    parse_duration_secs(key, &raw)
}

fn parse_duration_secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let secs = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be at least 1 second".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme: {other}"),
        )),
    }
}
