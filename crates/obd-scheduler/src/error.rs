//! Relay Error Types

use obd_protocol::ObdError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors loading configuration files
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be inspected
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file does not parse into the expected shape
    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    /// A value is out of range
    #[error("Invalid parameter {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Errors that unwind to the reconnection loop
#[derive(Debug, Error)]
pub enum RelayError {
    /// Adapter dialog or serial link failure
    #[error(transparent)]
    Obd(#[from] ObdError),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A whole round of requests went unanswered
    #[error("Unable to communicate on the serial port anymore ({0} consecutive failures)")]
    LinkLost(usize),
}

impl RelayError {
    /// Whether the serial link itself failed
    pub fn is_channel_fault(&self) -> bool {
        match self {
            RelayError::Obd(e) => e.is_channel_fault(),
            _ => false,
        }
    }
}
