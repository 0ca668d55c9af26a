//! Error types used by configuration and the hardware adapters.
//!
//! The node core itself reports outcomes as `bool`/`Option`; these errors
//! stay inside the adapters and configuration loading.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration could not be loaded from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    MissingVar(&'static str),

    #[error("Invalid MAC address: '{0}'")]
    InvalidMac(String),

    #[error("Invalid profile entry '{entry}': {reason}")]
    InvalidProfile { entry: String, reason: String },

    #[error("No device profiles configured. Please set NODE_PROFILES or NODE_PROFILE_<N>_MAC environment variables")]
    NoProfiles,

    #[error("Invalid MQTT_URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("MQTT_URL '{0}' has no host")]
    MissingHost(String),

    #[error("Invalid value for {var}: '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("Failed to read board MAC from {path}: {source}")]
    BoardMac {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A local sensor sample could not be taken.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("local sensor not configured")]
    NotConfigured,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unexpected value in {path}: '{value}'")]
    Parse { path: PathBuf, value: String },
}

/// A scan window could not be opened.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("radio refused to start scanning")]
    RadioRefused,

    #[error("radio failed while scanning")]
    RadioFailed,

    #[error("previous scan window has not been drained")]
    NotDrained,
}

/// An SNTP query did not produce a clock offset.
#[derive(Debug, Error)]
pub enum ClockError {
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no IPv4 address for {0}")]
    NoAddress(String),

    #[error("SNTP exchange failed: {0}")]
    Sntp(String),

    #[error("no answer within {0:?}")]
    Timeout(std::time::Duration),
}
