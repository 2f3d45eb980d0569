//! Transport layer: how an agent gets its byte stream.
//!
//! Provides the `Connector` trait and the plain TCP implementation.
//! Anything that yields an `AsyncRead + AsyncWrite` stream can stand in,
//! which is how TLS (or an in-memory pipe in tests) gets plugged in.

pub mod tcp;

pub use tcp::TcpConnector;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ServerAddr;
use crate::error::Result;

/// A bidirectional byte stream an agent can own.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens connections to job servers.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `addr`, honoring its `secure` flag or refusing it.
    async fn connect(&self, addr: &ServerAddr) -> Result<BoxedStream>;
}
