use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Gateway tuning loaded from an optional TOML file.
///
/// The root directory is not part of this file; it comes from the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// In-memory budget for multipart file parts (in bytes). Parts beyond it
    /// spill to temporary files.
    #[serde(default = "default_max_form_memory")]
    pub max_form_memory: u64,

    /// Cap on the request body size (in bytes). `None` means unlimited.
    #[serde(default)]
    pub max_request_body: Option<usize>,

    /// How long in-flight requests may run after a shutdown signal (in seconds)
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_max_form_memory() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

fn default_drain_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_form_memory: default_max_form_memory(),
            max_request_body: None,
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_form_memory, 10 << 20);
        assert_eq!(config.max_request_body, None);
        assert_eq!(config.drain_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("drain_timeout_secs = 5").unwrap();
        assert_eq!(config.drain_timeout_secs, 5);
        assert_eq!(config.max_form_memory, 10 << 20);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("filegate.toml");
        std::fs::write(&path, "max_form_memory = 1024\nmax_request_body = 4096\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.max_form_memory, 1024);
        assert_eq!(config.max_request_body, Some(4096));
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("filegate.toml");
        std::fs::write(&path, "max_form_memory = \"lots\"").unwrap();

        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
