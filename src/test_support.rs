//! In-memory job servers for exercising clients and workers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::DuplexStream;

use crate::agent::{Agent, Side};
use crate::config::ServerAddr;
use crate::error::{GearmanError, Result};
use crate::protocol::{Command, CommandType};
use crate::transport::{BoxedStream, Connector};

const PIPE_CAPACITY: usize = 64 * 1024;
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands out pre-made duplex pipes in the order they were queued.
#[derive(Default)]
pub struct PipeConnector {
    pending: Mutex<VecDeque<DuplexStream>>,
}

impl PipeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue one connection and return the server's end of it.
    pub fn serve(&self) -> Agent {
        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        self.pending.lock().unwrap().push_back(client);
        Agent::new(Box::new(server), addr(), Side::Responder)
    }
}

#[async_trait]
impl Connector for PipeConnector {
    async fn connect(&self, _addr: &ServerAddr) -> Result<BoxedStream> {
        let stream = self.pending.lock().unwrap().pop_front();
        let stream = stream.ok_or_else(|| {
            GearmanError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
        })?;
        Ok(Box::new(stream))
    }
}

pub fn addr() -> ServerAddr {
    ServerAddr::new("pipe", 4730, false)
}

/// Next frame from the worker or client, failing the test if none comes.
pub async fn recv(server: &Agent) -> Command {
    tokio::time::timeout(STEP_TIMEOUT, server.receive())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection failed")
}

/// Next frame that is not a poll (`GRAB_JOB`, `GRAB_JOB_UNIQ`, `PRE_SLEEP`).
pub async fn recv_skipping_polls(server: &Agent) -> Command {
    loop {
        let command = recv(server).await;
        match command.kind {
            CommandType::GrabJob | CommandType::GrabJobUniq | CommandType::PreSleep => continue,
            _ => return command,
        }
    }
}

/// Assert nothing arrives for a short while.
pub async fn assert_quiet(server: &Agent) {
    let outcome = tokio::time::timeout(Duration::from_millis(50), server.receive()).await;
    assert!(outcome.is_err(), "unexpected frame: {outcome:?}");
}

pub async fn reply(server: &Agent, kind: CommandType, args: &[&[u8]]) {
    server.send(kind, args).await.expect("reply failed");
}
