//! Server configuration.
//!
//! Loaded from a TOML file. Every field has a default, so a missing file
//! yields a runnable configuration (plain TCP on the default port, SQLite
//! database in the working directory).

use crate::packet::NODE_MAX;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub link: LinkConfig,
}

/// Listener and admission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen port.
    pub port: u16,
    /// Maximum concurrent client sessions. 0 = unlimited.
    pub max_sessions: usize,
    /// Wrap client connections in TLS.
    pub tls: bool,
    /// PEM certificate chain, used when tls is enabled.
    pub cert_file: PathBuf,
    /// PEM private key, used when tls is enabled.
    pub key_file: PathBuf,
    /// PID file path. None = default location in the state directory.
    pub pid_file: Option<PathBuf>,
}

/// Packet and user storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file.
    pub file: PathBuf,
}

/// Space-segment link settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Node address this server answers for on the space segment.
    pub node: u8,
    /// Outbound command queue capacity.
    pub outbound_capacity: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4600,
            max_sessions: 0,
            tls: false,
            cert_file: PathBuf::from("mcc.crt"),
            key_file: PathBuf::from("mcc.key"),
            pid_file: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("mcc.db"),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            node: 9,
            outbound_capacity: 100,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, Box<toml::de::Error>),
    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl Config {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a
    /// value fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file if it exists, otherwise returns defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link.node > NODE_MAX {
            return Err(ConfigError::Invalid {
                reason: format!("link.node {} exceeds {NODE_MAX}", self.link.node),
            });
        }
        if self.link.outbound_capacity == 0 {
            return Err(ConfigError::Invalid {
                reason: "link.outbound_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 4600);
        assert_eq!(config.server.max_sessions, 0);
        assert!(!config.server.tls);
        assert_eq!(config.database.file, PathBuf::from("mcc.db"));
        assert_eq!(config.link.node, 9);
        assert_eq!(config.link.outbound_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcc.toml");
        std::fs::write(&path, "[server]\nport = 4710\nmax_sessions = 8\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 4710);
        assert_eq!(config.server.max_sessions, 8);
        // Untouched sections keep their defaults
        assert_eq!(config.link.node, 9);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 4600);
    }

    #[test]
    fn test_load_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(&dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_node() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcc.toml");
        std::fs::write(&path, "[link]\nnode = 40\n").unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.link.outbound_capacity = 0;
        assert!(config.validate().is_err());
    }
}
