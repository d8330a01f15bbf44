//! Link Error Types
//!
//! Every failure on the motor link is reported as a [`LinkError`]. The
//! connection manager decides from the variant whether the session is lost.

use thiserror::Error;

/// Result type for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Motor link errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    /// Operation issued while the link is not in the Connected state
    #[error("not connected")]
    NotConnected,

    /// Connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// Socket read/write failed
    #[error("IO error: {0}")]
    Io(String),

    /// Connect or request did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed or unexpected frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Device answered with a Modbus exception response
    #[error("Modbus exception {code:#04x} on FC{function:02X}")]
    Exception { function: u8, code: u8 },

    /// Invalid connection parameters
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io(err.to_string())
    }
}

impl LinkError {
    pub fn connection(msg: impl Into<String>) -> Self {
        LinkError::Connection(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        LinkError::Io(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        LinkError::Timeout(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        LinkError::Protocol(msg.into())
    }

    /// Whether the session must be dropped and re-established.
    ///
    /// A device exception proves the session is alive, so it does not count.
    /// A protocol error means the byte stream can no longer be trusted.
    pub fn needs_reconnect(&self) -> bool {
        match self {
            LinkError::Connection(_)
            | LinkError::Io(_)
            | LinkError::Timeout(_)
            | LinkError::Protocol(_)
            | LinkError::NotConnected => true,
            LinkError::Exception { .. } | LinkError::Config(_) => false,
        }
    }
}
