//! Crate-wide error types
//!
//! One flat error enum covering the failure taxonomy of the relay:
//! transport, protocol, routing, backpressure, lifecycle, and internal
//! errors. The read pump uses [`Error::severity`] to pick a log level,
//! so protocol noise from misbehaving peers stays out of the error log.

use thiserror::Error;
use tracing::Level;

use crate::protocol::MessageType;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all relay operations
#[derive(Debug, Error)]
pub enum Error {
    /// WebSocket-level read/write/handshake failure
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Underlying socket or file I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Inbound frame is not a well-formed envelope
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    /// Envelope payload does not match the schema for its type
    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    /// No handler is registered for the envelope's type
    #[error("no handler registered for message type: {0}")]
    UnknownMessageType(MessageType),

    /// Targeted delivery addressed a client the hub does not know
    #[error("target client not found: {0}")]
    TargetNotFound(String),

    /// The connection's bounded send queue is saturated
    #[error("send queue is full")]
    SendQueueFull,

    /// One of the hub's producer queues is saturated
    #[error("hub {queue} queue is full")]
    HubQueueFull {
        /// Which hub queue rejected the request
        queue: &'static str,
    },

    /// The connection has been closed
    #[error("connection closed")]
    ConnectionClosed,

    /// The hub has been stopped and accepts no new work
    #[error("hub stopped")]
    HubStopped,

    /// Registration was rejected
    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    /// The client has not completed registration with the relay
    #[error("client is not registered")]
    NotRegistered,

    /// A bounded operation exceeded its deadline
    #[error("operation timed out: {0}")]
    Timeout(&'static str),

    /// Encoding an outbound envelope failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Invariant violation or unexpected internal state
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid configuration value
    #[error("invalid configuration: {field}: {message}")]
    Config {
        /// Dotted path of the offending field
        field: String,
        /// Why the value was rejected
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Log level appropriate for this error when it surfaces in a pump
    ///
    /// Protocol and routing failures are peer-induced and expected in
    /// normal operation; backpressure and lifecycle races are warnings;
    /// everything else indicates a fault on our side of the wire.
    pub fn severity(&self) -> Level {
        match self {
            Error::MalformedEnvelope(_)
            | Error::MalformedPayload(_)
            | Error::UnknownMessageType(_)
            | Error::TargetNotFound(_) => Level::INFO,
            Error::SendQueueFull
            | Error::HubQueueFull { .. }
            | Error::ConnectionClosed
            | Error::HubStopped
            | Error::NotRegistered
            | Error::RegistrationFailed(_)
            | Error::Timeout(_) => Level::WARN,
            Error::Transport(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Internal(_)
            | Error::Config { .. } => Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classification() {
        assert_eq!(
            Error::TargetNotFound("bob".into()).severity(),
            Level::INFO
        );
        assert_eq!(Error::SendQueueFull.severity(), Level::WARN);
        assert_eq!(Error::Internal("broken".into()).severity(), Level::ERROR);
    }

    #[test]
    fn test_config_error_display() {
        let err = Error::config("server.port", "invalid port number");
        assert_eq!(
            err.to_string(),
            "invalid configuration: server.port: invalid port number"
        );
    }
}
