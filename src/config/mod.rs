//! Configuration module
//!
//! Handles loading and saving relay configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::{IdentityMode, WireFormat, DEFAULT_PORT};
use crate::relay::{DedupPolicy, RelayOptions};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkSettings,

    /// Relay behavior
    #[serde(default)]
    pub relay: RelaySettings,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Human-readable name for this relay instance
    pub name: String,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
    /// Log file path (optional)
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            verbose: false,
            log_file: None,
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind to (default: all)
    pub bind_address: Option<String>,
    /// Per-peer outbound queue depth
    #[serde(default = "default_queue_depth")]
    pub send_queue_depth: usize,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_queue_depth() -> usize {
    256
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: None,
            send_queue_depth: default_queue_depth(),
        }
    }
}

/// Relay behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Wire layout of inbound frames
    #[serde(default = "default_wire_format")]
    pub wire_format: WireFormat,
    /// Player identity derivation strategy
    #[serde(default = "default_identity")]
    pub identity: IdentityMode,
    /// Whether dedup gates delivery or only informs it
    #[serde(default)]
    pub dedup: DedupPolicy,
}

fn default_wire_format() -> WireFormat {
    WireFormat::Compact
}

fn default_identity() -> IdentityMode {
    IdentityMode::SequenceParity
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            wire_format: default_wire_format(),
            identity: default_identity(),
            dedup: DedupPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tickrelay/config.toml")),
            Some(PathBuf::from("./tickrelay.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Relay options derived from the `[relay]` section
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            wire_format: self.relay.wire_format,
            identity: self.relay.identity,
            dedup: self.relay.dedup,
        }
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> String {
    let config = Config {
        general: GeneralConfig {
            name: "lockstep-hub".to_string(),
            verbose: false,
            log_file: None,
        },
        relay: RelaySettings {
            wire_format: WireFormat::Tagged,
            identity: IdentityMode::FrameField,
            dedup: DedupPolicy::Advisory,
        },
        ..Default::default()
    };

    toml::to_string_pretty(&config).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert_eq!(config.relay.wire_format, WireFormat::Compact);
        assert_eq!(config.relay.identity, IdentityMode::SequenceParity);
        assert_eq!(config.relay.dedup, DedupPolicy::Advisory);
    }

    #[test]
    fn test_save_and_load() {
        let config = Config::default();
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.network.port, config.network.port);
        assert_eq!(loaded.relay.dedup, config.relay.dedup);
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.general.name, "lockstep-hub");
        assert_eq!(parsed.relay.identity, IdentityMode::FrameField);
    }

    #[test]
    fn test_relay_section_parses() {
        let config: Config = toml::from_str(
            r#"
            [relay]
            wire_format = "tagged"
            identity = "frame-field"
            dedup = "gating"
            "#,
        )
        .unwrap();
        assert_eq!(config.relay.wire_format, WireFormat::Tagged);
        assert_eq!(config.relay.dedup, DedupPolicy::Gating);
        assert!(config.relay_options().codec().is_ok());
    }
}
