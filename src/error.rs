//! Error taxonomy for the client and worker.
//!
//! Everything that can go wrong on a connection is a [`GearmanError`].
//! Pool bookkeeping keys off [`GearmanError::is_fatal`]: a fatal error
//! means the byte stream can no longer be trusted and the agent is dropped.
//! A well-formed frame that merely arrives out of turn is not fatal.

use thiserror::Error;

use crate::protocol::CommandType;

#[derive(Debug, Error)]
pub enum GearmanError {
    /// Malformed frame. The stream is desynchronized.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Arguments that cannot be framed. Nothing was written.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A well-formed frame that makes no sense for the current exchange.
    /// The frame is consumed; the stream itself is still in sync.
    #[error("unexpected {got} while waiting for {expected}")]
    UnexpectedCommand {
        expected: &'static str,
        got: CommandType,
    },

    /// The server answered with an `ERROR` frame.
    #[error("server error {code}: {text}")]
    Server { code: String, text: String },

    #[error("connection to {0} closed")]
    ConnectionClosed(String),

    #[error("no servers available")]
    NoServers,

    #[error("secure transport requested for {0} but the connector only speaks plain TCP")]
    SecureTransportUnsupported(String),

    /// The job limiter was closed under a poll loop.
    #[error("worker is shutting down")]
    ShuttingDown,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GearmanError {
    /// Reset, broken pipe or EOF on the underlying connection.
    pub const fn is_connection_fault(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed(_))
    }

    /// Whether the connection that produced this error must be abandoned:
    /// it is gone, or its byte stream is desynchronized.
    pub const fn is_fatal(&self) -> bool {
        self.is_connection_fault() || matches!(self, Self::Protocol(_))
    }
}

pub type Result<T> = std::result::Result<T, GearmanError>;
