use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::{AppError, ErrorKind, DEFAULT_UPLOAD_URL, MAX_IMAGE_BYTES, UPLOAD_TIMEOUT, USER_AGENT};

pub const ENV_UPLOAD_URL: &str = "NOELUPLOAD_UPLOAD_URL";
pub const ENV_DATABASE: &str = "NOELUPLOAD_DATABASE";
pub const ENV_TIMEOUT_MS: &str = "NOELUPLOAD_TIMEOUT_MS";

pub const MAX_TIMEOUT_MS: u64 = 600_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::new(ErrorKind::Configuration, e.to_string())
    }
}

/// Settings the shell hands to the core at startup, usually as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub upload_url: String,
    pub upload_timeout_ms: u64,
    pub max_image_bytes: usize,
    /// History database file. `None` keeps the history in memory.
    pub database_path: Option<PathBuf>,
    pub user_agent: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            upload_timeout_ms: u64::try_from(UPLOAD_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            max_image_bytes: MAX_IMAGE_BYTES,
            database_path: None,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Applies `NOELUPLOAD_*` variables on top of the current values.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(url) = lookup(ENV_UPLOAD_URL) {
            self.upload_url = url;
        }
        if let Some(path) = lookup(ENV_DATABASE) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_MS) {
            self.upload_timeout_ms = timeout.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "upload_timeout_ms",
                reason: format!("'{timeout}' is not a number of milliseconds"),
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.upload_url).map_err(|e| ConfigError::Invalid {
            field: "upload_url",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::Invalid {
                field: "upload_url",
                reason: "must be an http(s) URL with a host".to_string(),
            });
        }

        if self.upload_timeout_ms == 0 || self.upload_timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::Invalid {
                field: "upload_timeout_ms",
                reason: format!("must be between 1 and {MAX_TIMEOUT_MS}"),
            });
        }

        if self.max_image_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_image_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "user_agent",
                reason: "cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }
}
