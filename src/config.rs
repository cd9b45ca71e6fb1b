//! Client configuration
//!
//! Supplied by the surrounding application once, before the first
//! connection attempt: from the environment, a JSON document, a file, or a
//! config endpoint.

use crate::connection::{ReconnectPolicy, DEFAULT_RECONNECT_INTERVAL};
use crate::error::ChatError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const DEFAULT_API_PATH: &str = "/conversations/{conversation}/messages";
const DEFAULT_MAX_RECONNECT_MS: u64 = 60_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Reconnect delay schedule selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Push endpoint, `{identity}` is substituted per connection
    pub push_url: String,
    pub api_base_url: String,
    /// Call path appended to `api_base_url`, `{conversation}` is substituted
    #[serde(default = "default_api_path")]
    pub api_path: String,
    /// Extra headers sent with every synchronous call
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default)]
    pub reconnect_backoff: BackoffKind,
    #[serde(default = "default_max_reconnect_ms")]
    pub reconnect_max_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_path() -> String {
    DEFAULT_API_PATH.to_string()
}

fn default_reconnect_interval_ms() -> u64 {
    u64::try_from(DEFAULT_RECONNECT_INTERVAL.as_millis()).unwrap_or(5000)
}

fn default_max_reconnect_ms() -> u64 {
    DEFAULT_MAX_RECONNECT_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            push_url: String::new(),
            api_base_url: String::new(),
            api_path: default_api_path(),
            headers: BTreeMap::new(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            reconnect_backoff: BackoffKind::default(),
            reconnect_max_interval_ms: DEFAULT_MAX_RECONNECT_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Read `CHATLINK_*` environment variables.
    ///
    /// `CHATLINK_HEADERS` is a `;`-separated list of `name=value` pairs.
    pub fn from_env() -> Result<Self, ChatError> {
        let mut config = Self {
            push_url: std::env::var("CHATLINK_PUSH_URL").unwrap_or_default(),
            api_base_url: std::env::var("CHATLINK_API_URL").unwrap_or_default(),
            ..Self::default()
        };

        if let Ok(path) = std::env::var("CHATLINK_API_PATH") {
            config.api_path = path;
        }
        if let Ok(headers) = std::env::var("CHATLINK_HEADERS") {
            config.headers = parse_header_list(&headers)?;
        }
        if let Some(ms) = env_u64("CHATLINK_RECONNECT_MS")? {
            config.reconnect_interval_ms = ms;
        }
        if let Some(ms) = env_u64("CHATLINK_RECONNECT_MAX_MS")? {
            config.reconnect_max_interval_ms = ms;
        }
        if let Some(secs) = env_u64("CHATLINK_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = secs;
        }
        if let Ok(kind) = std::env::var("CHATLINK_RECONNECT_BACKOFF") {
            config.reconnect_backoff = match kind.as_str() {
                "fixed" => BackoffKind::Fixed,
                "exponential" => BackoffKind::Exponential,
                other => {
                    return Err(ChatError::config(format!(
                        "CHATLINK_RECONNECT_BACKOFF must be fixed or exponential, got {other:?}"
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ChatError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ChatError::config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ChatError::config(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Fetch the config document from the config endpoint
    pub async fn fetch(url: &str) -> Result<Self, ChatError> {
        let response = reqwest::get(url)
            .await
            .map_err(|e| ChatError::config(format!("Failed to fetch config from {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::config(format!(
                "Config endpoint {url} returned {status}"
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ChatError::config(format!("Failed to read config body: {e}")))?;
        Self::from_json(&body)
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        if self.push_url.trim().is_empty() {
            return Err(ChatError::config("push_url is required"));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(ChatError::config("api_base_url is required"));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(ChatError::config("reconnect_interval_ms must be positive"));
        }
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let interval = Duration::from_millis(self.reconnect_interval_ms);
        match self.reconnect_backoff {
            BackoffKind::Fixed => ReconnectPolicy::Fixed(interval),
            BackoffKind::Exponential => ReconnectPolicy::Exponential {
                initial: interval,
                max: Duration::from_millis(self.reconnect_max_interval_ms).max(interval),
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_u64(name: &str) -> Result<Option<u64>, ChatError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ChatError::config(format!("{name} must be an integer: {e}"))),
        Err(_) => Ok(None),
    }
}

fn parse_header_list(raw: &str) -> Result<BTreeMap<String, String>, ChatError> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| ChatError::config(format!("Malformed header entry {pair:?}")))
        })
        .collect()
}
