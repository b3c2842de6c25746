//! Client configuration.
//!
//! Configuration precedence (highest first):
//! 1. Values set explicitly by the caller (CLI flags)
//! 2. Environment variables (`PEK_SERVER_URL`, `PEK_REQUEST_TIMEOUT_SECS`, `PEK_CONNECT_TIMEOUT_SECS`)
//! 3. Local config file (`./.pekrc`)
//! 4. Global config file (`~/.pek/config.toml`)
//! 5. Defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_SERVER_URL: &str = "http://localhost:3347";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ClientConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ClientConfigResult<T> = std::result::Result<T, ClientConfigError>;

/// Resolved configuration used to open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the Pek server (http or https).
    pub server_url: String,
    /// Bound on every request/acknowledge round trip. `0` waits forever.
    pub request_timeout_secs: u64,
    /// Bound on the WebSocket and Socket.IO handshake.
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Contents of a TOML configuration file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfigFile {
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl ClientConfigFile {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ClientConfigResult<Self> {
        if !path.exists() {
            return Err(ClientConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| ClientConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> ClientConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ClientConfigError::ParseError(format!("Failed to serialize: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ClientConfigError::ReadError(format!("Failed to create directory: {}", e)))?;
        }

        std::fs::write(path, content)
            .map_err(|e| ClientConfigError::ReadError(format!("Failed to write file: {}", e)))?;

        Ok(())
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".pek")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".pekrc")
    }
}

impl ClientConfig {
    /// Defaults overlaid with one configuration file.
    pub fn from_file(path: &Path) -> ClientConfigResult<Self> {
        let mut config = Self::default();
        config.merge(&ClientConfigFile::load_from_file(path)?);
        Ok(config)
    }

    /// Discover and load configuration files, then apply environment overrides.
    ///
    /// Missing files are skipped. Local config overrides global config.
    pub fn discover_and_load() -> ClientConfigResult<Self> {
        let mut config = Self::default();

        for path in [ClientConfigFile::default_global_path(), ClientConfigFile::default_local_path()] {
            match ClientConfigFile::load_from_file(&path) {
                Ok(file) => config.merge(&file),
                Err(ClientConfigError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Merge a configuration file into this one. Keys present in `file` win.
    pub fn merge(&mut self, file: &ClientConfigFile) {
        if let Some(ref server_url) = file.server_url {
            self.server_url = server_url.clone();
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout_secs = secs;
        }
        if let Some(secs) = file.connect_timeout_secs {
            self.connect_timeout_secs = secs;
        }
    }

    /// Apply `PEK_*` overrides, reading variables through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> ClientConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_secs = |key: &str, value: String| {
            value.trim().parse::<u64>().map_err(|_| {
                ClientConfigError::InvalidValue(format!("{key} must be a whole number of seconds, got '{value}'"))
            })
        };

        if let Some(url) = lookup("PEK_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(value) = lookup("PEK_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_secs("PEK_REQUEST_TIMEOUT_SECS", value)?;
        }
        if let Some(value) = lookup("PEK_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = parse_secs("PEK_CONNECT_TIMEOUT_SECS", value)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into();
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout_secs = timeout.map_or(0, |t| t.as_secs().max(1));
        self
    }

    /// `None` when requests wait indefinitely.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn validate(&self) -> ClientConfigResult<()> {
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(ClientConfigError::InvalidValue(format!(
                "server_url must start with http:// or https://, got: {}",
                self.server_url
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, "http://localhost:3347");
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_request_timeout_disables_bound() {
        let config = ClientConfig { request_timeout_secs: 0, ..ClientConfig::default() };
        assert_eq!(config.request_timeout(), None);
        assert_eq!(ClientConfig::default().with_request_timeout(None).request_timeout(), None);
    }

    #[test]
    fn test_load_and_merge_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "server_url = \"http://pek.local:9000\"\nrequest_timeout_secs = 5\n").unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.server_url, "http://pek.local:9000");
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_later_file_overrides_only_its_keys() {
        let mut config = ClientConfig::default();
        config.merge(&ClientConfigFile {
            server_url: Some("http://global:1".to_string()),
            request_timeout_secs: Some(60),
            connect_timeout_secs: None,
        });
        config.merge(&ClientConfigFile { server_url: Some("http://local:2".to_string()), ..Default::default() });
        assert_eq!(config.server_url, "http://local:2");
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");
        let file = ClientConfigFile { connect_timeout_secs: Some(3), ..Default::default() };
        file.save_to_file(&path).unwrap();
        assert_eq!(ClientConfigFile::load_from_file(&path).unwrap(), file);
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.toml");
        assert!(matches!(ClientConfigFile::load_from_file(&missing), Err(ClientConfigError::NotFound(_))));

        let broken = temp_dir.path().join("broken.toml");
        std::fs::write(&broken, "server_url = ").unwrap();
        assert!(matches!(ClientConfigFile::load_from_file(&broken), Err(ClientConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> =
            HashMap::from([("PEK_SERVER_URL", "https://pek.example"), ("PEK_REQUEST_TIMEOUT_SECS", "0")]);
        let mut config = ClientConfig::default();
        config.apply_env_with(|key| env.get(key).map(ToString::to_string)).unwrap();
        assert_eq!(config.server_url, "https://pek.example");
        assert_eq!(config.request_timeout(), None);

        let mut config = ClientConfig::default();
        let err = config
            .apply_env_with(|key| (key == "PEK_CONNECT_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ClientConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let config = ClientConfig::default().with_server_url("ws://localhost:3347");
        assert!(config.validate().is_err());
    }
}
