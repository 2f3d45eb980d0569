//! Connection agent.
//!
//! An `Agent` owns one live connection to a job server. The stream is split
//! so a worker's poll loop can sit in `receive()` while handler tasks push
//! progress frames out on the same connection. Bytes read past the end of a
//! frame stay in the receive buffer for the next `receive()`.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ServerAddr;
use crate::error::{GearmanError, Result};
use crate::protocol::{codec, Command, CommandType};
use crate::transport::BoxedStream;

/// Bytes requested from the socket per read.
const READ_CHUNK: usize = 1024;

/// Which magic this end writes and which it expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Sends `\0REQ`, parses `\0RES`. Clients and workers.
    Requester,
    /// Sends `\0RES`, parses `\0REQ`. Stands in for a job server in tests.
    #[cfg(test)]
    Responder,
}

impl Side {
    const fn expects_responses(self) -> bool {
        matches!(self, Self::Requester)
    }

    const fn sends_responses(self) -> bool {
        !self.expects_responses()
    }
}

struct Inbound {
    reader: ReadHalf<BoxedStream>,
    buffer: BytesMut,
}

pub struct Agent {
    addr: ServerAddr,
    side: Side,
    inbound: Mutex<Inbound>,
    writer: Mutex<WriteHalf<BoxedStream>>,
    polling: AtomicBool,
}

impl Agent {
    pub fn new(stream: BoxedStream, addr: ServerAddr, side: Side) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            addr,
            side,
            inbound: Mutex::new(Inbound {
                reader,
                buffer: BytesMut::with_capacity(READ_CHUNK),
            }),
            writer: Mutex::new(writer),
            polling: AtomicBool::new(false),
        }
    }

    pub const fn addr(&self) -> &ServerAddr {
        &self.addr
    }

    pub const fn side(&self) -> Side {
        self.side
    }

    /// Encode and write one frame, waiting until the stream accepts it.
    pub async fn send(&self, kind: CommandType, args: &[&[u8]]) -> Result<()> {
        let frame = codec::encode(kind, self.side.sends_responses(), args)?;
        self.write_frame(kind, &frame).await
    }

    /// Send an already-built command.
    pub async fn send_command(&self, command: &Command) -> Result<()> {
        let frame = codec::encode_command(command, self.side.sends_responses())?;
        self.write_frame(command.kind, &frame).await
    }

    async fn write_frame(&self, kind: CommandType, frame: &Bytes) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await?;
        debug!(server = %self.addr, command = %kind, bytes = ?frame, "Send");
        Ok(())
    }

    /// Wait for the next complete frame.
    ///
    /// Blocks until a whole frame is buffered or the connection fails.
    /// There is no timeout here; wrap the call if one is needed.
    pub async fn receive(&self) -> Result<Command> {
        let mut inbound = self.inbound.lock().await;
        self.receive_locked(&mut inbound).await
    }

    /// Send a request and wait for its answer as one exchange.
    ///
    /// The receive side stays locked across the send so no other caller can
    /// pick up the answer in between.
    pub async fn request(&self, kind: CommandType, args: &[&[u8]]) -> Result<Command> {
        let mut inbound = self.inbound.lock().await;
        self.send(kind, args).await?;
        self.receive_locked(&mut inbound).await
    }

    async fn receive_locked(&self, inbound: &mut Inbound) -> Result<Command> {
        let expect_response = self.side.expects_responses();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some((command, consumed)) = codec::decode(&inbound.buffer, expect_response)? {
                let frame = inbound.buffer.split_to(consumed);
                debug!(server = %self.addr, command = %command.kind, bytes = ?frame, "Recv");
                return Ok(command);
            }

            let n = inbound.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(GearmanError::ConnectionClosed(self.addr.to_string()));
            }
            inbound.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Claim the poll loop for this agent. False if one is already running.
    pub(crate) fn start_polling(&self) -> bool {
        !self.polling.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn stop_polling(&self) {
        self.polling.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("addr", &self.addr)
            .field("side", &self.side)
            .finish_non_exhaustive()
    }
}
