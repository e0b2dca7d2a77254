//! Error taxonomy shared by the listener and sender paths.
//!
//! Only [`ConnectError`] is ever retried, and only by the listener. Protocol
//! violations are fatal. A rejected token is not an error at all: it is the
//! [`crate::handshake::HandshakeOutcome::RejectedToken`] outcome.

use std::{io, time::Duration};

use thiserror::Error;

/// Failures of the framed line transport. No retry happens at this layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,
    #[error("transport i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("no data within {limit:?}")]
    Timeout { limit: Duration },
}

/// Failures while establishing a TCP connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection refused by {address}")]
    Refused { address: String },
    #[error("failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("connecting to {address} timed out after {limit:?}")]
    Timeout { address: String, limit: Duration },
    #[error("failed to connect to {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl ConnectError {
    pub(crate) fn from_io(address: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused {
                address: address.to_string(),
            },
            _ => Self::Io {
                address: address.to_string(),
                source,
            },
        }
    }

    /// Whether the listener should back off and try again.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("message is empty")]
    Empty,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("host must not be empty")]
    EmptyHost,
    #[error("port must be between 1 and 65535")]
    InvalidPort,
    #[error("connect timeout must be greater than zero")]
    ZeroConnectTimeout,
    #[error("max backoff must be greater than zero")]
    ZeroMaxBackoff,
    #[error("{field} must be a single non-empty line")]
    InvalidLine { field: &'static str },
}

/// Crate-level error returned by the listener and sender entry points.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("failed to append to history log: {0}")]
    History(#[source] io::Error),
}
