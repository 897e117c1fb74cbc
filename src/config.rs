//! Client configuration: JSON file first, environment variables on top.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConsoleError, Result};

pub const ENV_BASE_URL: &str = "ORGANIZER_BASE_URL";
pub const ENV_CSRF_TOKEN: &str = "ORGANIZER_CSRF_TOKEN";
pub const ENV_TIMEOUT_SECS: &str = "ORGANIZER_TIMEOUT_SECS";

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Root of the API server, without the `/api` suffix.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Sent as `X-CSRFToken` on every mutating request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,

    /// Upper bound for any single request.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Keep row selections across document reloads.
    #[serde(default)]
    pub preserve_selection: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            csrf_token: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            preserve_selection: false,
        }
    }
}

impl ConsoleConfig {
    /// Load from an optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConsoleError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| ConsoleError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production, a map in tests).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(token) = lookup(ENV_CSRF_TOKEN) {
            self.csrf_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            self.request_timeout_secs = secs
                .trim()
                .parse()
                .map_err(|_| ConsoleError::Config(format!("{} is not a number: {}", ENV_TIMEOUT_SECS, secs)))?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ConsoleError::Config("base_url is empty".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConsoleError::Config("request_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `base_url` joined with an absolute API path.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
