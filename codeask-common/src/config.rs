//! Configuration management for the codeask engine.
//!
//! Configuration lives in a single file at `~/.codeask/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (CODEASK_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `CODEASK_RUNTIME_URL` → runtime.endpoint
//! - `CODEASK_RUNTIME_DIRECTORY` → runtime.directory
//! - `CODEASK_AGENT` → runtime.default_agent
//! - `CODEASK_DB_PATH` → store.path
//! - `CODEASK_LOG_LEVEL` → observability.log_level
//! - `CODEASK_LOG_FORMAT` → observability.log_format

use crate::error::{Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new()
        .map_or_else(
            || PathBuf::from(".codeask"),
            |dirs| dirs.home_dir().join(".codeask"),
        )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Agent runtime connection
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Exchange timing (progress interval, grace window, hard ceiling)
    #[serde(default)]
    pub exchange: ExchangeConfig,

    /// Session store location
    #[serde(default)]
    pub store: StoreConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("CODEASK_RUNTIME_URL") {
            self.runtime.endpoint = url;
        }
        if let Some(dir) = lookup("CODEASK_RUNTIME_DIRECTORY") {
            self.runtime.directory = Some(dir);
        }
        if let Some(agent) = lookup("CODEASK_AGENT") {
            self.runtime.default_agent = Some(agent);
        }
        if let Some(path) = lookup("CODEASK_DB_PATH") {
            self.store.path = path;
        }
        if let Some(level) = lookup("CODEASK_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("CODEASK_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }
}

/// Agent runtime connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Base URL of the agent runtime server
    #[serde(default = "default_runtime_endpoint")]
    pub endpoint: String,

    /// Project directory the runtime should explore (sent as `?directory=`)
    #[serde(default)]
    pub directory: Option<String>,

    /// Agent used when the channel has no override
    #[serde(default)]
    pub default_agent: Option<String>,

    /// Connection timeout in seconds (also bounds waiting for the event stream)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Timeout for non-streaming API requests in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_runtime_endpoint(),
            directory: None,
            default_agent: None,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl RuntimeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Exchange timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Minimum spacing between outward progress notifications
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// How long to wait for a compaction signal after the answer is captured
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,

    /// Upper bound on the total duration of one exchange
    #[serde(default = "default_hard_ceiling_secs")]
    pub hard_ceiling_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: default_progress_interval_ms(),
            grace_window_secs: default_grace_window_secs(),
            hard_ceiling_secs: default_hard_ceiling_secs(),
        }
    }
}

impl ExchangeConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_window_secs)
    }

    pub fn hard_ceiling(&self) -> Duration {
        Duration::from_secs(self.hard_ceiling_secs)
    }
}

/// Session store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path (`~` is expanded)
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    /// Resolve the database path, expanding `~` and environment variables.
    pub fn resolved_path(&self) -> PathBuf {
        match shellexpand::full(&self.path) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(e) => {
                tracing::warn!(path = %self.path, error = %e, "Failed to expand store path");
                PathBuf::from(&self.path)
            }
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to force to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_runtime_endpoint() -> String {
    "http://127.0.0.1:4096".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_progress_interval_ms() -> u64 {
    2_000
}

fn default_grace_window_secs() -> u64 {
    30
}

fn default_hard_ceiling_secs() -> u64 {
    600
}

fn default_store_path() -> String {
    "~/.codeask/sessions.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.runtime.endpoint, "http://127.0.0.1:4096");
        assert_eq!(config.exchange.progress_interval(), Duration::from_secs(2));
        assert_eq!(config.exchange.grace_window(), Duration::from_secs(30));
        assert_eq!(config.exchange.hard_ceiling(), Duration::from_secs(600));
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"runtime": {{"endpoint": "http://agent:9000", "directory": "/srv/repo"}},
               "exchange": {{"grace_window_secs": 5}},
               "observability": {{"level": "debug"}}}}"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.runtime.endpoint, "http://agent:9000");
        assert_eq!(config.runtime.directory.as_deref(), Some("/srv/repo"));
        assert_eq!(config.runtime.connect_timeout_secs, 10);
        assert_eq!(config.exchange.grace_window_secs, 5);
        assert_eq!(config.exchange.hard_ceiling_secs, 600);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_invalid_file_is_config_context_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CODEASK_RUNTIME_URL", "http://override:1234"),
            ("CODEASK_AGENT", "explore"),
            ("CODEASK_DB_PATH", "/tmp/codeask.db"),
            ("CODEASK_LOG_LEVEL", "trace"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.runtime.endpoint, "http://override:1234");
        assert_eq!(config.runtime.default_agent.as_deref(), Some("explore"));
        assert_eq!(config.store.path, "/tmp/codeask.db");
        assert_eq!(config.observability.log_level, "trace");
        assert!(config.runtime.directory.is_none());
    }

    #[test]
    fn test_store_path_expansion() {
        let store = StoreConfig {
            path: "/var/lib/codeask/sessions.db".to_string(),
        };
        assert_eq!(
            store.resolved_path(),
            PathBuf::from("/var/lib/codeask/sessions.db")
        );
    }
}
