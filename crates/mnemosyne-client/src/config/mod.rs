//! Client configuration.
//!
//! Loaded from a TOML file, then optionally overridden from the environment:
//!
//! ```toml
//! address = "http://sessions.internal:8080"
//! connect_timeout_ms = 2000
//! request_timeout_ms = 500
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 50
//!
//! [bag]
//! max_entries = 32
//! ```

pub mod bag;

pub use bag::BagPolicy;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Environment variable overriding [`ClientConfig::address`].
pub const ADDRESS_ENV: &str = "MNEMOSYNE_ADDRESS";
/// Environment variable overriding [`ClientConfig::request_timeout_ms`].
pub const REQUEST_TIMEOUT_ENV: &str = "MNEMOSYNE_REQUEST_TIMEOUT_MS";
/// Environment variable overriding [`RetryConfig::max_attempts`].
pub const MAX_ATTEMPTS_ENV: &str = "MNEMOSYNE_MAX_ATTEMPTS";

/// Session client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Session service URI.
    #[serde(default = "default_address")]
    pub address: String,

    /// Timeout for establishing the connection.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound of a single remote call, applied on top of the call
    /// context deadline.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub bag: BagPolicy,
}

fn default_address() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: None,
            retry: RetryConfig::default(),
            bag: BagPolicy::default(),
        }
    }
}

/// Retry section of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.multiplier,
        )
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Override fields from `MNEMOSYNE_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Override fields from variables resolved by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup(ADDRESS_ENV) {
            self.address = address;
        }
        if let Some(timeout) = lookup(REQUEST_TIMEOUT_ENV) {
            self.request_timeout_ms = Some(parse_env(REQUEST_TIMEOUT_ENV, &timeout)?);
        }
        if let Some(attempts) = lookup(MAX_ATTEMPTS_ENV) {
            self.retry.max_attempts = parse_env(MAX_ATTEMPTS_ENV, &attempts)?;
        }
        Ok(())
    }

    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::InvalidValue("address must not be empty".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue(format!(
                "retry.multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::InvalidValue(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| ConfigError::InvalidValue(format!("{name}={value:?}: {e}")))
}
