use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_STREAM_PATH: &str = "/api/stream";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Connection settings for [`crate::client::HttpEventSource`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the orchestration backend.
    pub base_url: String,
    /// Path of the streaming endpoint, joined onto `base_url`.
    pub stream_path: String,
    /// Connect timeout, also the longest silence allowed between body reads.
    /// A stream that keeps producing data is never cut off.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Builds a config from the process environment, after loading `.env`
    /// if one is present.
    ///
    /// - `PLAN_STREAM_BASE_URL` (required)
    /// - `PLAN_STREAM_PATH` (default `/api/stream`)
    /// - `PLAN_STREAM_TIMEOUT_SECS` (default 300)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let base_url = lookup("PLAN_STREAM_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("PLAN_STREAM_BASE_URL"))?;
        let mut config = Self::new(base_url.trim());
        if let Some(path) = lookup("PLAN_STREAM_PATH").filter(|v| !v.trim().is_empty()) {
            config = config.stream_path(path.trim());
        }
        if let Some(raw) = lookup("PLAN_STREAM_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|e| ConfigError::Invalid {
                key: "PLAN_STREAM_TIMEOUT_SECS",
                message: format!("{e}"),
            })?;
            config = config.timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn stream_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.stream_path.trim_start_matches('/')
        )
    }
}
