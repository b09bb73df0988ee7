//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur while talking to an ELM327 adapter
#[derive(Debug, Error)]
pub enum ObdError {
    /// Serial port connection error (port missing, access denied, I/O failure)
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// The port stopped delivering bytes for good
    #[error("Serial port closed")]
    PortClosed,

    /// The adapter did not end a handshake step with its prompt
    #[error("No prompt after {0}!")]
    NoPrompt(&'static str),

    /// Invalid answer during a handshake step
    #[error("Invalid answer: {0}")]
    InvalidAnswer(String),

    /// The desired baud rate was required but could not be applied
    #[error("The desired baud rate {0} b/s could not be selected!")]
    BaudRateUnavailable(u32),

    /// Configured bus protocol selector is not a valid ATSP code
    #[error("Protocol not supported: {0}")]
    UnsupportedProtocol(String),
}

impl ObdError {
    /// Whether the error comes from the serial link itself rather than the adapter dialog
    pub fn is_channel_fault(&self) -> bool {
        matches!(self, ObdError::SerialError(_) | ObdError::PortClosed)
    }
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}
