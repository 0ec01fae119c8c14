//! Configuration management for the actuator bridge
//!
//! Settings are merged env > TOML file > default.

pub mod file;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::dispatch::DefineRequest;
use crate::{Error, Result};

/// Default API server port
pub const DEFAULT_PORT: u16 = 18800;

/// Default seconds between reconnect attempts
pub const DEFAULT_RETRY_SECS: u64 = 10;

/// Stands in for keys in debug output
pub const REDACTED: &str = "<redacted>";

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API server configuration
    pub api_server: ApiServerConfig,

    /// Path to data directory (device store)
    pub data_dir: PathBuf,

    /// Wait between reconnect attempts
    pub retry_interval: Duration,

    /// Endpoint receiving device notifications; logged only when unset
    pub upstream_url: Option<String>,

    /// Devices declared in the config file
    pub devices: Vec<DefineRequest>,
}

/// HTTP API server configuration
#[derive(Clone)]
pub struct ApiServerConfig {
    pub port: u16,
    pub api_key: Option<String>,
}

impl fmt::Debug for ApiServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiServerConfig")
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| REDACTED))
            .finish()
    }
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if the merged settings are unusable
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with environment lookups
    ///
    /// # Errors
    ///
    /// Returns `Config` if the retry interval is zero
    pub fn from_sources(
        fc: file::BridgeConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_server = ApiServerConfig {
            port: parsed(&env, "ACTUATOR_PORT")
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            api_key: env("ACTUATOR_API_KEY").or(fc.server.api_key),
        };

        let retry_secs = parsed(&env, "ACTUATOR_RETRY_SECS")
            .or(fc.devices.retry_interval_secs)
            .unwrap_or(DEFAULT_RETRY_SECS);
        if retry_secs == 0 {
            return Err(Error::Config(
                "reconnect interval must be at least one second".to_string(),
            ));
        }

        // ~/.local/share/actuator-bridge on Linux
        let data_dir = env("ACTUATOR_DATA_DIR")
            .or(fc.server.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        Ok(Self {
            api_server,
            data_dir,
            retry_interval: Duration::from_secs(retry_secs),
            upstream_url: env("ACTUATOR_UPSTREAM_URL").or(fc.upstream.url),
            devices: fc.device,
        })
    }
}

fn parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    let value = raw.trim().parse().ok();
    if value.is_none() {
        tracing::warn!(key, value = %raw, "ignoring unparsable environment variable");
    }
    value
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("."),
        |d| d.data_dir().join("actuator-bridge"),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_sources(file::BridgeConfigFile::default(), env(&[])).unwrap();
        assert_eq!(config.api_server.port, DEFAULT_PORT);
        assert_eq!(config.retry_interval, Duration::from_secs(DEFAULT_RETRY_SECS));
        assert!(config.api_server.api_key.is_none());
        assert!(config.upstream_url.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let fc: file::BridgeConfigFile = toml::from_str(
            r#"
            [server]
            port = 9000
            data_dir = "/var/lib/bridge"

            [devices]
            retry_interval_secs = 30
            "#,
        )
        .unwrap();
        let config = Config::from_sources(
            fc,
            env(&[("ACTUATOR_PORT", "9100"), ("ACTUATOR_UPSTREAM_URL", "http://hub/notify")]),
        )
        .unwrap();

        assert_eq!(config.api_server.port, 9100);
        assert_eq!(config.retry_interval, Duration::from_secs(30));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/bridge"));
        assert_eq!(config.upstream_url.as_deref(), Some("http://hub/notify"));
    }

    #[test]
    fn bad_env_value_falls_through() {
        let config = Config::from_sources(
            file::BridgeConfigFile::default(),
            env(&[("ACTUATOR_PORT", "not-a-port")]),
        )
        .unwrap();
        assert_eq!(config.api_server.port, DEFAULT_PORT);
    }

    #[test]
    fn zero_retry_is_rejected() {
        let result = Config::from_sources(
            file::BridgeConfigFile::default(),
            env(&[("ACTUATOR_RETRY_SECS", "0")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn debug_output_hides_keys() {
        let fc: file::BridgeConfigFile = toml::from_str(
            r#"
            [server]
            api_key = "file-api-key"

            [[device]]
            name = "blind1"
            kind = "blind"
            id = "bf01"
            key = "device-local-key"
            "#,
        )
        .unwrap();
        assert!(!format!("{fc:?}").contains("file-api-key"));

        let config = Config::from_sources(fc, env(&[("ACTUATOR_API_KEY", "env-api-key")])).unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains("env-api-key"));
        assert!(!printed.contains("device-local-key"));
        assert!(printed.contains(REDACTED));
        assert!(printed.contains("blind1"));
    }
}
