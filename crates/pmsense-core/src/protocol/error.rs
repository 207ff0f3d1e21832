//! Protocol errors

use thiserror::Error;

/// Errors that can occur during sensor communication
///
/// Timeouts and malformed replies are not errors: a short buffer or a `None`
/// decode is the signal for those.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The port could not be opened or prepared
    #[error("Failed to open serial port {port}: {reason}")]
    TransportOpen { port: String, reason: String },

    /// Writing a command frame failed
    #[error("Serial write failed: {0}")]
    TransportWrite(String),

    /// The transport broke while reading
    #[error("Serial read failed: {0}")]
    TransportRead(String),

    /// Name not in the command catalog
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// No transport attached
    #[error("Not connected to sensor")]
    NotConnected,

    /// A transport is already attached
    #[error("Already connected")]
    AlreadyConnected,

    /// Configuration failed validation or could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Filesystem or other I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error ends the current session rather than a single cycle
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::TransportOpen { .. }
                | ProtocolError::UnknownCommand(_)
                | ProtocolError::NotConnected
        )
    }
}
