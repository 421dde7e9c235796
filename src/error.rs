use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::net::SocketAddr;

use crate::protocol::frame::FrameError;

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), GatewayError>`].
///
/// [`Result<(), GatewayError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The listening socket could not be bound. This is the one failure the gateway
    /// surfaces loudly, since no client can connect at all.
    Bind {
        /// The address we tried to bind.
        addr: SocketAddr,
        /// The underlying OS error.
        context: String,
    },
    /// A socket operation on an accepted connection failed.
    SocketError {
        /// A description of the socket error.
        context: String,
    },
    /// A WebSocket frame could not be decoded.
    Protocol(FrameError),
    /// The HTTP upgrade request was unusable.
    Handshake {
        /// Why the request was rejected.
        reason: String,
    },
    /// A configuration value is out of range.
    InvalidConfig {
        /// Further specifies why the configuration was invalid.
        info: String,
    },
    /// Serialization or deserialization of an envelope failed.
    SerializationError {
        /// A description of what failed to serialize/deserialize.
        context: String,
    },
    /// The connection is already closed; nothing more can be sent on it.
    ConnectionClosed,
    /// [`Gateway::start`] was called on a gateway that is already listening.
    ///
    /// [`Gateway::start`]: crate::Gateway::start
    AlreadyRunning,
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { addr, context } => {
                write!(f, "Failed to bind listener on {}: {}", addr, context)
            },
            Self::SocketError { context } => write!(f, "Socket error: {}", context),
            Self::Protocol(err) => write!(f, "Protocol error: {}", err),
            Self::Handshake { reason } => write!(f, "Handshake rejected: {}", reason),
            Self::InvalidConfig { info } => write!(f, "Invalid configuration: {}", info),
            Self::SerializationError { context } => {
                write!(f, "Serialization error: {}", context)
            },
            Self::ConnectionClosed => write!(f, "The connection is closed."),
            Self::AlreadyRunning => write!(f, "The gateway is already running."),
        }
    }
}

impl Error for GatewayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FrameError> for GatewayError {
    fn from(err: FrameError) -> Self {
        Self::Protocol(err)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            context: err.to_string(),
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::SocketError {
            context: format!("{:?}: {}", err.kind(), err),
        }
    }
}
