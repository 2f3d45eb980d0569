//! Gearman client.
//!
//! Jobs go to a server picked uniformly at random from the pool. A server
//! whose connection fails during an exchange is dropped from the pool and
//! the error goes back to the caller; nothing is retried on another server,
//! since resubmitting is only safe if the caller controls the `unique` id.
//!
//! Job handles are opaque bytes and are passed back to the server unchanged.

use std::sync::Arc;

use bytes::Bytes;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{Agent, Side};
use crate::config::ServerAddr;
use crate::error::{GearmanError, Result};
use crate::protocol::{Command, CommandType};
use crate::transport::{Connector, TcpConnector};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// How to submit a job.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Dedup token. A fresh UUID is used when absent.
    pub unique: Option<String>,
    pub priority: Priority,
    /// Fire and forget: no result will be delivered.
    pub background: bool,
}

impl SubmitOptions {
    pub const fn background() -> Self {
        Self {
            unique: None,
            priority: Priority::Normal,
            background: true,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_unique(mut self, unique: impl Into<String>) -> Self {
        self.unique = Some(unique.into());
        self
    }
}

/// The `SUBMIT_JOB*` variant for a priority and mode.
pub const fn submit_command(priority: Priority, background: bool) -> CommandType {
    match (priority, background) {
        (Priority::Low, false) => CommandType::SubmitJobLow,
        (Priority::Low, true) => CommandType::SubmitJobLowBg,
        (Priority::Normal, false) => CommandType::SubmitJob,
        (Priority::Normal, true) => CommandType::SubmitJobBg,
        (Priority::High, false) => CommandType::SubmitJobHigh,
        (Priority::High, true) => CommandType::SubmitJobHighBg,
    }
}

/// Outcome of a submission.
#[derive(Debug)]
pub enum Submission {
    /// Server-assigned handle of a background job.
    Background(Bytes),
    /// Handle to await a foreground job's result.
    Foreground(Task),
}

impl Submission {
    pub const fn job_handle(&self) -> &Bytes {
        match self {
            Self::Background(handle) => handle,
            Self::Foreground(task) => task.job_handle(),
        }
    }
}

/// A foreground job whose result is still to come.
///
/// Results are read straight off the connection the job was submitted on and
/// are not matched against the handle. Keep at most one foreground job in
/// flight per server connection, and do not call `result()` twice without
/// the server having sent something in between, or the second call blocks.
#[derive(Debug)]
pub struct Task {
    agent: Arc<Agent>,
    job_handle: Bytes,
}

impl Task {
    pub const fn job_handle(&self) -> &Bytes {
        &self.job_handle
    }

    /// Read the next frame the server sends for this connection.
    pub async fn result(&self) -> Result<Command> {
        self.agent.receive().await
    }

    /// Read until `WORK_COMPLETE`, `WORK_FAIL` or `WORK_EXCEPTION`.
    ///
    /// Intermediate `WORK_STATUS`, `WORK_DATA` and `WORK_WARNING` frames are
    /// logged and skipped.
    pub async fn wait(&self) -> Result<Command> {
        loop {
            let command = self.result().await?;
            match command.kind {
                CommandType::WorkComplete | CommandType::WorkFail | CommandType::WorkException => {
                    return Ok(command)
                }
                CommandType::WorkStatus | CommandType::WorkData | CommandType::WorkWarning => {
                    debug!(job = ?self.job_handle, command = %command.kind, "Progress");
                }
                _ => return Err(command.into_error("WORK_COMPLETE")),
            }
        }
    }
}

/// Parsed `STATUS_RES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub job_handle: Bytes,
    pub known: bool,
    pub running: bool,
    pub numerator: u64,
    pub denominator: u64,
}

impl JobStatus {
    fn from_command(command: &Command) -> Result<Self> {
        let flag = |name: &str| -> Result<bool> { Ok(&command.require(name)?[..] == b"1") };
        // Servers send an empty field when there is no progress to report.
        let number = |name: &str| -> Result<u64> {
            let text = String::from_utf8_lossy(command.require(name)?).into_owned();
            if text.is_empty() {
                return Ok(0);
            }
            text.parse()
                .map_err(|_| GearmanError::Protocol(format!("{name} is not a number: '{text}'")))
        };

        Ok(Self {
            job_handle: command.require("job_handle")?.clone(),
            known: flag("known")?,
            running: flag("running")?,
            numerator: number("numerator")?,
            denominator: number("denominator")?,
        })
    }
}

pub struct Client {
    connector: Arc<dyn Connector>,
    agents: RwLock<Vec<Arc<Agent>>>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_connector(Arc::new(TcpConnector::new()))
    }

    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            agents: RwLock::new(Vec::new()),
        }
    }

    pub async fn add_server(&self, host: &str, port: u16, secure: bool) -> Result<()> {
        self.add_server_addr(&ServerAddr::new(host, port, secure)).await
    }

    pub async fn add_server_addr(&self, addr: &ServerAddr) -> Result<()> {
        let stream = self.connector.connect(addr).await?;
        let agent = Arc::new(Agent::new(stream, addr.clone(), Side::Requester));
        self.agents.write().await.push(agent);
        info!(server = %addr, "Added server");
        Ok(())
    }

    pub async fn server_count(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Submit `workload` to `func_name`.
    pub async fn submit(
        &self,
        func_name: &str,
        workload: &[u8],
        options: SubmitOptions,
    ) -> Result<Submission> {
        let kind = submit_command(options.priority, options.background);
        let (agent, job_handle) = self
            .create(kind, func_name, options.unique.as_deref(), workload)
            .await?;

        if options.background {
            Ok(Submission::Background(job_handle))
        } else {
            Ok(Submission::Foreground(Task { agent, job_handle }))
        }
    }

    /// Foreground, normal priority.
    pub async fn submit_job(&self, func_name: &str, workload: &[u8]) -> Result<Task> {
        let (agent, job_handle) = self
            .create(CommandType::SubmitJob, func_name, None, workload)
            .await?;
        Ok(Task { agent, job_handle })
    }

    /// Background, normal priority. Returns the job handle.
    pub async fn submit_background(&self, func_name: &str, workload: &[u8]) -> Result<Bytes> {
        let (_, job_handle) = self
            .create(CommandType::SubmitJobBg, func_name, None, workload)
            .await?;
        Ok(job_handle)
    }

    async fn create(
        &self,
        kind: CommandType,
        func_name: &str,
        unique: Option<&str>,
        workload: &[u8],
    ) -> Result<(Arc<Agent>, Bytes)> {
        let unique = unique.map_or_else(|| Uuid::new_v4().to_string(), String::from);
        let (agent, created) = self
            .exchange(
                kind,
                &[func_name.as_bytes(), unique.as_bytes(), workload],
                CommandType::JobCreated,
            )
            .await?;
        let job_handle = created.require("job_handle")?.clone();
        debug!(server = %agent.addr(), job = ?job_handle, command = %kind, "Job created");
        Ok((agent, job_handle))
    }

    /// Schedule a background job to run at a Unix timestamp.
    pub async fn submit_at(
        &self,
        func_name: &str,
        workload: &[u8],
        unique: Option<&str>,
        epoch: u64,
    ) -> Result<Bytes> {
        let unique = unique.map_or_else(|| Uuid::new_v4().to_string(), String::from);
        let epoch = epoch.to_string();
        let (_, created) = self
            .exchange(
                CommandType::SubmitJobEpoch,
                &[func_name.as_bytes(), unique.as_bytes(), epoch.as_bytes(), workload],
                CommandType::JobCreated,
            )
            .await?;
        Ok(created.require("job_handle")?.clone())
    }

    /// Ask a server about a job.
    ///
    /// Handles are only meaningful to the server that issued them, so with
    /// several servers in the pool the answer may be "unknown".
    pub async fn get_status(&self, job_handle: &[u8]) -> Result<JobStatus> {
        let (_, status) = self
            .exchange(
                CommandType::GetStatus,
                &[job_handle],
                CommandType::StatusRes,
            )
            .await?;
        JobStatus::from_command(&status)
    }

    pub async fn echo(&self, data: &[u8]) -> Result<Vec<u8>> {
        let (_, echoed) = self
            .exchange(CommandType::EchoReq, &[data], CommandType::EchoRes)
            .await?;
        Ok(echoed.require("workload")?.to_vec())
    }

    /// Set a connection option (e.g. `exceptions`) on every server.
    pub async fn set_option(&self, option: &str) -> Result<()> {
        let agents = self.agents.read().await.clone();
        if agents.is_empty() {
            return Err(GearmanError::NoServers);
        }

        for agent in agents {
            let outcome = agent
                .request(CommandType::OptionReq, &[option.as_bytes()])
                .await
                .and_then(|reply| reply.expect(CommandType::OptionRes));
            if let Err(e) = outcome {
                return Err(self.forget_if_desynced(&agent, e).await);
            }
        }
        Ok(())
    }

    /// One request/response on a randomly chosen server.
    async fn exchange(
        &self,
        kind: CommandType,
        args: &[&[u8]],
        expected: CommandType,
    ) -> Result<(Arc<Agent>, Command)> {
        let agent = {
            let agents = self.agents.read().await;
            let mut rng = rand::thread_rng();
            agents.choose(&mut rng).cloned()
        };
        let agent = agent.ok_or(GearmanError::NoServers)?;

        let outcome = agent
            .request(kind, args)
            .await
            .and_then(|reply| reply.expect(expected));

        match outcome {
            Ok(reply) => Ok((agent, reply)),
            Err(e) => Err(self.forget_if_desynced(&agent, e).await),
        }
    }

    /// Drop `agent` from the pool if `error` left its connection unusable.
    ///
    /// A well-formed but unexpected frame (say, a result for an earlier
    /// foreground job) leaves the stream in sync, so the server stays.
    async fn forget_if_desynced(&self, agent: &Arc<Agent>, error: GearmanError) -> GearmanError {
        if error.is_fatal() {
            warn!(server = %agent.addr(), error = %error, "Removing server");
            self.agents.write().await.retain(|a| !Arc::ptr_eq(a, agent));
        }
        error
    }
}
