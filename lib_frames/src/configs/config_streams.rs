use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Environment variable {name} has invalid value '{value}'")]
    InvalidEnvVar { name: String, value: String },
}

/// An unknown backoff or key policy name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {kind} '{value}'")]
pub struct ParsePolicyError {
    kind: &'static str,
    value: String,
}

/// How the delay between reconnect attempts grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// Always wait `retry_delay_ms`.
    #[default]
    Fixed,
    /// Double the delay after each failed attempt, up to `max_retry_delay_ms`.
    Exponential,
}

impl FromStr for BackoffPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(BackoffPolicy::Fixed),
            "exponential" => Ok(BackoffPolicy::Exponential),
            _ => Err(ParsePolicyError { kind: "backoff policy", value: s.to_string() }),
        }
    }
}

/// Which part of a target decides whether two requests share one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKeyPolicy {
    /// Requests for the same endpoint URL share a stream, whatever their query,
    /// result id or size.
    #[default]
    Endpoint,
    /// Only requests with identical URL, query, result id and size share a stream.
    Target,
}

impl FromStr for StreamKeyPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "endpoint" => Ok(StreamKeyPolicy::Endpoint),
            "target" => Ok(StreamKeyPolicy::Target),
            _ => Err(ParsePolicyError { kind: "key policy", value: s.to_string() }),
        }
    }
}

/// # Streams Config
///
/// Tuning for `LiveStreams`. Every field has a default, so a config file only
/// needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamsConfig {
    /// Delay before reconnecting after an abnormal closure.
    pub retry_delay_ms: u64,
    pub backoff: BackoffPolicy,
    /// Upper bound for exponential backoff.
    pub max_retry_delay_ms: u64,
    /// Consecutive failed attempts before the stream gives up. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    pub key_policy: StreamKeyPolicy,
    /// How long a stream without subscribers stays connected before teardown.
    pub linger_ms: u64,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1000,
            backoff: BackoffPolicy::Fixed,
            max_retry_delay_ms: 30_000,
            max_reconnect_attempts: None,
            key_policy: StreamKeyPolicy::Endpoint,
            linger_ms: 0,
        }
    }
}

impl StreamsConfig {
    /// Reads a JSON config file. Missing keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json { path: path.to_path_buf(), source })
    }

    /// Overrides fields from `TAIL_RETRY_DELAY_MS`, `TAIL_BACKOFF`,
    /// `TAIL_MAX_RETRY_DELAY_MS`, `TAIL_MAX_RECONNECT_ATTEMPTS`, `TAIL_KEY_POLICY`
    /// and `TAIL_LINGER_MS` when they are set.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
            let parsed = value.trim().parse();
            parsed.map_err(|_| ConfigError::InvalidEnvVar { name: name.to_string(), value })
        }

        if let Some(v) = lookup("TAIL_RETRY_DELAY_MS") {
            self.retry_delay_ms = parse("TAIL_RETRY_DELAY_MS", v)?;
        }
        if let Some(v) = lookup("TAIL_BACKOFF") {
            self.backoff = parse("TAIL_BACKOFF", v)?;
        }
        if let Some(v) = lookup("TAIL_MAX_RETRY_DELAY_MS") {
            self.max_retry_delay_ms = parse("TAIL_MAX_RETRY_DELAY_MS", v)?;
        }
        if let Some(v) = lookup("TAIL_MAX_RECONNECT_ATTEMPTS") {
            self.max_reconnect_attempts = Some(parse("TAIL_MAX_RECONNECT_ATTEMPTS", v)?);
        }
        if let Some(v) = lookup("TAIL_KEY_POLICY") {
            self.key_policy = parse("TAIL_KEY_POLICY", v)?;
        }
        if let Some(v) = lookup("TAIL_LINGER_MS") {
            self.linger_ms = parse("TAIL_LINGER_MS", v)?;
        }
        Ok(self)
    }

    /// Delay before reconnect attempt number `attempt` (starting at 1).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let millis = match self.backoff {
            BackoffPolicy::Fixed => self.retry_delay_ms,
            BackoffPolicy::Exponential => {
                let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
                self.retry_delay_ms.saturating_mul(factor).min(self.max_retry_delay_ms)
            }
        };
        Duration::from_millis(millis)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}
