//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_URL: &str = "FLUX_URL";
pub const ENV_TOKEN: &str = "FLUX_SERVICE_TOKEN";
pub const ENV_TIMEOUT: &str = "FLUX_TIMEOUT_SECS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {var} has invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Where the service lives and how to authenticate against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL; its path is kept as a prefix for every route.
    pub endpoint: String,
    #[serde(default, skip_serializing)]
    pub token: String,
    /// Applied by the default transport to the whole exchange.
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            token: String::new(),
            timeout: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = token.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Read `FLUX_URL`, `FLUX_SERVICE_TOKEN` and `FLUX_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = lookup(ENV_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(ENV_URL))?;
        let token = lookup(ENV_TOKEN).unwrap_or_default();
        let timeout = match lookup(ENV_TIMEOUT) {
            Some(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                    var: ENV_TIMEOUT,
                    value: raw.clone(),
                })?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };
        Ok(Self {
            endpoint: endpoint.trim().to_string(),
            token,
            timeout,
        })
    }
}
