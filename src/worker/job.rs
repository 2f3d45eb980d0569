//! A job handed to a registered handler.
//!
//! The job reaches its connection through a `Weak` reference: once the
//! server is dropped from the pool, reporting on the job fails with
//! `ConnectionClosed` instead of keeping the socket alive.
//!
//! Handles and function names are kept as the exact bytes the server sent,
//! since they go back out on the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;

use crate::agent::Agent;
use crate::error::{GearmanError, Result};
use crate::protocol::{Command, CommandType};

#[derive(Clone)]
pub struct Job {
    handle: Bytes,
    function: Bytes,
    unique: Option<String>,
    workload: Bytes,
    agent: Weak<Agent>,
    finished: Arc<AtomicBool>,
}

impl Job {
    /// Build from a `JOB_ASSIGN` or `JOB_ASSIGN_UNIQ` frame.
    pub(crate) fn from_assignment(command: &Command, agent: &Arc<Agent>) -> Result<Self> {
        let unique = match command.kind {
            CommandType::JobAssign => None,
            CommandType::JobAssignUniq => command.arg_lossy("unique"),
            other => {
                return Err(GearmanError::UnexpectedCommand {
                    expected: "JOB_ASSIGN",
                    got: other,
                })
            }
        };

        Ok(Self {
            handle: command.require("job_handle")?.clone(),
            function: command.require("func_name")?.clone(),
            unique,
            workload: command.require("workload")?.clone(),
            agent: Arc::downgrade(agent),
            finished: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Server-assigned job handle.
    pub const fn handle(&self) -> &Bytes {
        &self.handle
    }

    /// Raw name of the function the job was submitted to.
    pub const fn function(&self) -> &Bytes {
        &self.function
    }

    /// The function name as text. `None` if it is not valid UTF-8.
    pub fn function_name(&self) -> Option<&str> {
        std::str::from_utf8(&self.function).ok()
    }

    /// Client-supplied unique id. Only set when polling with `GRAB_JOB_UNIQ`.
    pub fn unique(&self) -> Option<&str> {
        self.unique.as_deref()
    }

    pub const fn workload(&self) -> &Bytes {
        &self.workload
    }

    /// Whether `complete` or `fail` has been called.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub async fn complete(&self, data: impl AsRef<[u8]> + Send) -> Result<()> {
        self.finished.store(true, Ordering::Release);
        self.send(CommandType::WorkComplete, &[&self.handle[..], data.as_ref()])
            .await
    }

    pub async fn fail(&self) -> Result<()> {
        self.finished.store(true, Ordering::Release);
        self.send(CommandType::WorkFail, &[&self.handle[..]]).await
    }

    /// Report progress as `numerator / denominator`.
    pub async fn status(&self, numerator: u64, denominator: u64) -> Result<()> {
        let numerator = numerator.to_string();
        let denominator = denominator.to_string();
        self.send(
            CommandType::WorkStatus,
            &[&self.handle[..], numerator.as_bytes(), denominator.as_bytes()],
        )
        .await
    }

    /// Stream a partial result to the client.
    pub async fn data(&self, data: impl AsRef<[u8]> + Send) -> Result<()> {
        self.send(CommandType::WorkData, &[&self.handle[..], data.as_ref()])
            .await
    }

    pub async fn warning(&self, data: impl AsRef<[u8]> + Send) -> Result<()> {
        self.send(CommandType::WorkWarning, &[&self.handle[..], data.as_ref()])
            .await
    }

    pub async fn exception(&self, data: impl AsRef<[u8]> + Send) -> Result<()> {
        self.send(CommandType::WorkException, &[&self.handle[..], data.as_ref()])
            .await
    }

    async fn send(&self, kind: CommandType, args: &[&[u8]]) -> Result<()> {
        let agent = self.agent.upgrade().ok_or_else(|| {
            GearmanError::ConnectionClosed(format!("server of job {:?}", self.handle))
        })?;
        agent.send(kind, args).await
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("handle", &self.handle)
            .field("function", &self.function)
            .field("unique", &self.unique)
            .field("workload_len", &self.workload.len())
            .finish_non_exhaustive()
    }
}
