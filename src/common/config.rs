//! User settings file handling
//!
//! Optional `config.toml` in the user configuration directory. It supplies
//! the lowest-precedence server connection defaults and the polling
//! behaviour used while waiting for workflow invocations.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::paths::config_path;
use super::Result;
use crate::service::PollSettings;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Execution service connection defaults
    #[serde(default)]
    pub server: ServerDefaults,

    /// Invocation polling settings
    #[serde(default)]
    pub polling: PollingConfig,

    /// Output folder settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Execution service connection defaults
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ServerDefaults {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Polling settings for workflow invocations
#[derive(Debug, Deserialize)]
pub struct PollingConfig {
    /// Delay between two state requests
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Give up waiting after this many seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_interval() -> u64 {
    500
}
fn default_timeout() -> u64 {
    3600
}

/// Output folder configuration
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Folder used when neither the CLI nor the suite file names one
    #[serde(default = "default_output_folder")]
    pub folder: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            folder: default_output_folder(),
        }
    }
}

pub(crate) fn default_output_folder() -> String {
    "results".to_string()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| super::Error::config_parse(path, e))
    }

    /// Polling settings for the invocation wait loop
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(self.polling.interval_ms),
            timeout: Duration::from_secs(self.polling.timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.polling.interval_ms, 500);
        assert_eq!(config.polling.timeout_secs, 3600);
        assert_eq!(config.output.folder, "results");
        assert!(config.server.url.is_none());
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [server]
            url = "http://localhost:8080"

            [polling]
            timeout_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.server.url.as_deref(), Some("http://localhost:8080"));
        assert!(config.server.api_key.is_none());
        assert_eq!(config.polling.interval_ms, 500);
        assert_eq!(config.poll_settings().timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[polling\ninterval_ms = 1").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.is_configuration());
    }
}
