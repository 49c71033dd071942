//! Configuration file support
//!
//! Loads defaults from ~/.config/netio/config.toml. Command line options
//! always win over values from the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub defaults: TransferDefaults,

    #[serde(default)]
    pub tls: TlsDefaults,

    #[serde(default)]
    pub logging: LoggingDefaults,
}

/// Default transfer settings for both roles
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransferDefaults {
    /// Buffer size (e.g., "32K", "1M")
    pub buffer_size: Option<String>,

    /// Number of loops, 0 for unbounded
    pub loop_count: Option<u64>,

    /// Inactivity timeout (e.g., "1s", "500ms")
    pub loop_timeout: Option<String>,

    /// Pause between sending loops (e.g., "2s")
    pub loop_sleep: Option<String>,

    /// Hash algorithm (md5, sha224, sha256)
    pub hash: Option<String>,

    /// Rate limit in bytes per second (e.g., "100K")
    pub rate: Option<String>,

    /// Address family preference (ipv4, ipv6, dual)
    pub address_family: Option<String>,

    /// Clear serial buffers after opening a port
    pub reset_serial: Option<bool>,
}

/// Default TLS settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsDefaults {
    /// Enable TLS
    pub enabled: Option<bool>,

    /// Verify the peer certificate
    pub verify: Option<bool>,

    /// Certificate path (server identity or client certificate)
    pub cert: Option<String>,

    /// Private key path
    pub key: Option<String>,

    /// CA certificate path
    pub ca: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingDefaults {
    /// Log file path (e.g., "~/.config/netio/netio.log")
    pub file: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    pub level: Option<String>,
}

impl Config {
    /// Load configuration from the default path.
    /// Returns default config if file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit path, which must exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("netio")
            .join("config.toml")
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
