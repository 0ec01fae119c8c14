//! TOML configuration file loading
//!
//! Supports `~/.config/actuator-bridge/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use super::REDACTED;
use crate::dispatch::DefineRequest;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct BridgeConfigFile {
    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Device connection settings
    #[serde(default)]
    pub devices: DevicesFileConfig,

    /// Upstream controller
    #[serde(default)]
    pub upstream: UpstreamFileConfig,

    /// Devices defined at startup, as `[[device]]` tables
    #[serde(default, rename = "device")]
    pub device: Vec<DefineRequest>,
}

/// Server/runtime configuration
#[derive(Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Bearer key required on device routes
    pub api_key: Option<String>,

    /// Where the device store lives
    pub data_dir: Option<String>,
}

impl fmt::Debug for ServerFileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerFileConfig")
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| REDACTED))
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

/// Device connection settings
#[derive(Debug, Default, Deserialize)]
pub struct DevicesFileConfig {
    /// Seconds between reconnect attempts
    pub retry_interval_secs: Option<u64>,
}

/// Upstream controller configuration
#[derive(Debug, Default, Deserialize)]
pub struct UpstreamFileConfig {
    /// Endpoint receiving device notifications
    pub url: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `BridgeConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> BridgeConfigFile {
    let Some(path) = config_file_path() else {
        return BridgeConfigFile::default();
    };

    if !path.exists() {
        return BridgeConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                BridgeConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            BridgeConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/actuator-bridge/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("actuator-bridge").join("config.toml"))
}
