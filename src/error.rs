//! Error types for the actuator bridge

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the actuator bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Discovery could not locate the device on the network
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The transport failed to establish a connection
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Operation would break a registry invariant
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Unknown device, property or category
    #[error("not found: {0}")]
    NotFound(String),

    /// Blind has no committed calibration
    #[error("not calibrated: {0}")]
    NotCalibrated(String),

    /// Another device is already being calibrated
    #[error("calibration busy: {0}")]
    CalibrationBusy(String),

    /// Device answered a write with a different value
    #[error("command rejected: {0}")]
    CommandRejected(String),

    /// Malformed command input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Device transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
