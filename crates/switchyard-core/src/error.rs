//! Transport error types.

use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents errors that can occur while moving a request to an endpoint and
/// reading its response back.
///
/// Variants are split into two classes. The *I/O class* (see
/// [`TransportError::is_io_class`]) describes a failure of the network path to
/// one particular address and is what failover reacts to. Everything else is a
/// local or configuration problem that another address would not fix.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Failed to send the request.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive the response.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Failed to serialize or deserialize a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// The peer violated the HTTP protocol.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A blocking buffer operation did not complete within its wait timeout.
    #[error("Operation timed out")]
    Timeout,

    /// Connection establishment timed out.
    #[error(
        "Connection to {target} timed out after {timeout:?}. \
         If this is expected, increase `TimeoutConfig::connect`"
    )]
    ConnectionTimeout {
        /// The address being connected to
        target: String,
        /// The timeout duration that was exceeded
        timeout: Duration,
    },

    /// No response arrived within the receive timeout.
    #[error(
        "Read timed out after {timeout:?} waiting for a response from {target}. \
         If this is expected, increase `TimeoutConfig::receive`"
    )]
    ReadTimeout {
        /// The address the request was sent to
        target: String,
        /// The timeout duration that was exceeded
        timeout: Duration,
    },

    /// The endpoint answered with a status that means the service is not there.
    #[error("Service at {address} not available (HTTP {status})")]
    ServiceNotAvailable {
        /// Address that answered
        address: String,
        /// HTTP status code (404 or 503)
        status: u16,
    },

    /// The target address uses a scheme the conduit cannot speak.
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// The conduit or buffer was shut down while the operation was in progress.
    #[error("Transport shut down: {0}")]
    Shutdown(String),

    /// The transport was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Authentication with the remote endpoint failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    /// Whether this error describes a failure of the path to one address.
    pub fn is_io_class(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::ConnectionLost(_)
                | Self::SendFailed(_)
                | Self::ReceiveFailed(_)
                | Self::Timeout
                | Self::ConnectionTimeout { .. }
                | Self::ReadTimeout { .. }
                | Self::ServiceNotAvailable { .. }
                | Self::Shutdown(_)
                | Self::Io(_)
        )
    }

    /// Whether this error is one of the timeout variants.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionTimeout { .. } | Self::ReadTimeout { .. }
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        // Errors that were tunnelled through `std::io` keep their variant
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<TransportError>()) {
            return inner.clone();
        }
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout,
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable => {
                Self::ConnectionFailed(err.to_string())
            }
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => Self::ConnectionLost(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<TransportError> for std::io::Error {
    fn from(err: TransportError) -> Self {
        let kind = match &err {
            TransportError::Timeout
            | TransportError::ConnectionTimeout { .. }
            | TransportError::ReadTimeout { .. } => std::io::ErrorKind::TimedOut,
            TransportError::ConnectionFailed(_) => std::io::ErrorKind::ConnectionRefused,
            TransportError::ConnectionLost(_) => std::io::ErrorKind::ConnectionReset,
            TransportError::Shutdown(_) => std::io::ErrorKind::BrokenPipe,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}
