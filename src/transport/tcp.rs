//! Plain TCP connector.

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use super::{BoxedStream, Connector};
use crate::config::ServerAddr;
use crate::error::{GearmanError, Result};

/// Connects with `tokio::net::TcpStream`. Refuses `secure` addresses.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl TcpConnector {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &ServerAddr) -> Result<BoxedStream> {
        if addr.secure {
            return Err(GearmanError::SecureTransportUnsupported(addr.to_string()));
        }

        let stream = TcpStream::connect((addr.host.as_str(), addr.port)).await?;
        stream.set_nodelay(true)?;
        debug!(server = %addr, "Connected");
        Ok(Box::new(stream))
    }
}
