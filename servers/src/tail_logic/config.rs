use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use lib_frames::configs::{BackoffPolicy, StreamKeyPolicy, StreamsConfig};
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_FILE: &str = "server_tail.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Live log tail relay server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TAIL_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "TAIL_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TAIL_LOG_DIR", help = "Directory for rotating JSON log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TAIL_LOG_LEVEL", help = "Logging level or filter directive (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TAIL_DEFAULT_SIZE", help = "Buffer rows for requests that do not pass a size.")]
    pub default_size: Option<usize>,

    // Stream tuning. The JSON file and the TAIL_* variables are read by
    // `StreamsConfig`; these flags override both.
    #[clap(long, help = "Delay in milliseconds before reconnecting a dropped upstream.")]
    #[serde(skip)]
    pub retry_delay_ms: Option<u64>,

    #[clap(long, help = "Reconnect backoff policy: fixed or exponential.")]
    #[serde(skip)]
    pub backoff: Option<BackoffPolicy>,

    #[clap(long, help = "Upper bound in milliseconds for exponential backoff.")]
    #[serde(skip)]
    pub max_retry_delay_ms: Option<u64>,

    #[clap(long, help = "Consecutive failed reconnects before a stream gives up.")]
    #[serde(skip)]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, help = "Stream sharing: endpoint (one stream per URL) or target.")]
    #[serde(skip)]
    pub key_policy: Option<StreamKeyPolicy>,

    #[clap(long, help = "Milliseconds an unused upstream stays connected.")]
    #[serde(skip)]
    pub linger_ms: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            default_size: other.default_size.or(self.default_size),
            retry_delay_ms: other.retry_delay_ms.or(self.retry_delay_ms),
            backoff: other.backoff.or(self.backoff),
            max_retry_delay_ms: other.max_retry_delay_ms.or(self.max_retry_delay_ms),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            key_policy: other.key_policy.or(self.key_policy),
            linger_ms: other.linger_ms.or(self.linger_ms),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(9003),
            log_level: Some("info".to_string()),
            default_size: Some(1000),
            ..Default::default()
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(9003)
    }

    pub fn default_size(&self) -> usize {
        self.default_size.unwrap_or(1000)
    }

    /// The JSON file in use: `--config-path`, or `server_tail.conf` when present.
    fn config_file(&self) -> Option<PathBuf> {
        match &self.config_path {
            Some(path) => Some(path.clone()),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                path.exists().then_some(path)
            }
        }
    }

    /// Stream tuning for the `LiveStreams` cache: defaults, then the JSON file, then
    /// `TAIL_*` environment variables, then CLI flags.
    pub fn streams_config(&self) -> Result<StreamsConfig> {
        let streams = match self.config_file() {
            Some(path) => StreamsConfig::from_json_file(path)?,
            None => StreamsConfig::default(),
        };
        Ok(self.apply_stream_flags(streams.with_env_overrides()?))
    }

    fn apply_stream_flags(&self, mut streams: StreamsConfig) -> StreamsConfig {
        if let Some(v) = self.retry_delay_ms {
            streams.retry_delay_ms = v;
        }
        if let Some(v) = self.backoff {
            streams.backoff = v;
        }
        if let Some(v) = self.max_retry_delay_ms {
            streams.max_retry_delay_ms = v;
        }
        if let Some(v) = self.max_reconnect_attempts {
            streams.max_reconnect_attempts = Some(v);
        }
        if let Some(v) = self.key_policy {
            streams.key_policy = v;
        }
        if let Some(v) = self.linger_ms {
            streams.linger_ms = v;
        }
        streams
    }
}

/// Layers the server settings: defaults, then the JSON file (`--config-path`, or
/// `server_tail.conf` when present), then environment variables and CLI flags.
/// Stream tuning is layered separately by [`Config::streams_config`].
pub fn load_config() -> Result<Config> {
    resolve_config(Config::parse())
}

pub fn resolve_config(cli: Config) -> Result<Config> {
    let mut current_config = Config::defaults();

    if let Some(path) = cli.config_file() {
        let text = fs::read_to_string(&path)
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        let file_config: Config = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
        current_config = current_config.merge(file_config);
    }

    Ok(current_config.merge(cli))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_apply_without_sources() {
        let config = resolve_config(Config::default()).unwrap();
        assert_eq!(config.port(), 9003);
        assert_eq!(config.default_size(), 1000);
        assert_eq!(config.streams_config().unwrap(), StreamsConfig::default());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "port": 7000, "lingerMs": 250, "keyPolicy": "target" }}"#).unwrap();

        let cli = Config::try_parse_from([
            "server_tail",
            "--config-path",
            file.path().to_str().unwrap(),
            "--port",
            "7100",
        ])
        .unwrap();
        let config = resolve_config(cli).unwrap();

        assert_eq!(config.port(), 7100);
        let streams = config.streams_config().unwrap();
        assert_eq!(streams.linger_ms, 250);
        assert_eq!(streams.key_policy, StreamKeyPolicy::Target);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Config { config_path: Some(PathBuf::from("/definitely/not/here.conf")), ..Default::default() };
        assert!(resolve_config(cli).is_err());
    }

    #[test]
    fn test_policy_flags_are_typed() {
        let cli = Config::try_parse_from(["server_tail", "--backoff", "exponential", "--key-policy", "target"]).unwrap();
        assert_eq!(cli.backoff, Some(BackoffPolicy::Exponential));
        assert_eq!(cli.key_policy, Some(StreamKeyPolicy::Target));

        assert!(Config::try_parse_from(["server_tail", "--backoff", "sometimes"]).is_err());
    }

    #[test]
    fn test_stream_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "retryDelayMs": 250, "maxReconnectAttempts": 4, "backoff": "exponential" }}"#).unwrap();

        let cli = Config::try_parse_from([
            "server_tail",
            "--config-path",
            file.path().to_str().unwrap(),
            "--retry-delay-ms",
            "50",
        ])
        .unwrap();
        let streams = resolve_config(cli).unwrap().streams_config().unwrap();

        assert_eq!(streams.retry_delay_ms, 50);
        assert_eq!(streams.max_reconnect_attempts, Some(4));
        assert_eq!(streams.backoff, BackoffPolicy::Exponential);
    }

    #[test]
    fn test_invalid_stream_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "backoff": "sometimes" }}"#).unwrap();
        let config = Config { config_path: Some(file.path().to_path_buf()), ..Default::default() };
        assert!(config.streams_config().is_err());
    }
}
