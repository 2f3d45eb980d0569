//! Gearman worker.
//!
//! A `Worker` holds one agent per job server and a table of named handlers.
//! `work()` spawns one poll loop per server; every loop grabs jobs and hands
//! them to handler tasks, while a semaphore shared by all loops caps how many
//! handlers run at once. A failing connection ends only its own loop.

mod job;

pub use job::Job;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{Agent, Side};
use crate::config::{ServerAddr, WorkerConfig};
use crate::error::{GearmanError, Result};
use crate::protocol::{Command, CommandType};
use crate::transport::{Connector, TcpConnector};

/// Code run for each job of a registered function.
///
/// The handler reports through the [`Job`]: any number of `status`, `data`,
/// `warning` or `exception` calls, then exactly one `complete` or `fail`.
/// Returning `Err` before a terminal call makes the worker send `WORK_FAIL`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        (self)(job).await
    }
}

#[derive(Clone)]
struct Registration {
    handler: Arc<dyn JobHandler>,
    timeout: u32,
}

/// State the poll loops share with the owning `Worker`.
struct Shared {
    agents: RwLock<Vec<Arc<Agent>>>,
    functions: RwLock<HashMap<String, Registration>>,
    permits: Arc<Semaphore>,
    grab_unique: bool,
}

pub struct Worker {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    client_id: RwLock<Option<String>>,
}

impl Default for Worker {
    fn default() -> Self {
        Self::new(WorkerConfig::default())
    }
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector::new()))
    }

    pub fn with_connector(config: WorkerConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            shared: Arc::new(Shared {
                agents: RwLock::new(Vec::new()),
                functions: RwLock::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
                grab_unique: config.grab_unique,
            }),
            connector,
            client_id: RwLock::new(config.client_id),
        }
    }

    pub async fn add_server(&self, host: &str, port: u16, secure: bool) -> Result<()> {
        self.add_server_addr(&ServerAddr::new(host, port, secure)).await
    }

    /// Connect to a server and announce everything registered so far.
    pub async fn add_server_addr(&self, addr: &ServerAddr) -> Result<()> {
        let stream = self.connector.connect(addr).await?;
        let agent = Arc::new(Agent::new(stream, addr.clone(), Side::Requester));

        if let Some(id) = self.client_id.read().await.as_deref() {
            agent
                .send(CommandType::SetClientId, &[id.as_bytes()])
                .await?;
        }

        {
            let functions = self.shared.functions.read().await;
            for (name, registration) in functions.iter() {
                announce(&agent, name, registration.timeout).await?;
            }
        }

        self.shared.agents.write().await.push(agent);
        info!(server = %addr, "Added server");
        Ok(())
    }

    /// Register `handler` for `name`, replacing any previous handler.
    ///
    /// A non-zero `timeout` (seconds) is announced with `CAN_DO_TIMEOUT`.
    pub async fn add_func<F, Fut>(&self, name: &str, handler: F, timeout: u32) -> Result<()>
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_handler(name, Arc::new(handler), timeout).await
    }

    pub async fn add_handler(
        &self,
        name: &str,
        handler: Arc<dyn JobHandler>,
        timeout: u32,
    ) -> Result<()> {
        self.shared
            .functions
            .write()
            .await
            .insert(name.to_string(), Registration { handler, timeout });
        debug!(function = %name, timeout, "Registered function");

        let timeout_text = timeout.to_string();
        let (kind, args) = capability(name, timeout, &timeout_text);
        self.broadcast(kind, &args).await
    }

    /// Unregister `name` and tell every server with `CANT_DO`.
    pub async fn remove_func(&self, name: &str) -> Result<()> {
        self.shared.functions.write().await.remove(name);
        self.broadcast(CommandType::CantDo, &[name.as_bytes()]).await
    }

    /// Forget every function, here and on every server.
    pub async fn reset_abilities(&self) -> Result<()> {
        self.shared.functions.write().await.clear();
        self.broadcast(CommandType::ResetAbilities, &[]).await
    }

    pub async fn has_func(&self, name: &str) -> bool {
        self.shared.functions.read().await.contains_key(name)
    }

    /// Identify this worker to every server. Servers added later get it too.
    pub async fn set_client_id(&self, id: &str) -> Result<()> {
        *self.client_id.write().await = Some(id.to_string());
        self.broadcast(CommandType::SetClientId, &[id.as_bytes()]).await
    }

    pub async fn server_count(&self) -> usize {
        self.shared.agents.read().await.len()
    }

    /// Spawn a poll loop for every server that does not have one yet.
    ///
    /// Each loop runs on its own until its connection fails, then removes its
    /// server from the pool. The returned handles only let the caller wait
    /// for that; dropping them leaves the loops running. Servers added later
    /// need another call to `work()`.
    pub async fn work(&self) -> Vec<JoinHandle<()>> {
        let mut loops = Vec::new();
        for agent in self.shared.agents.read().await.iter() {
            let Some(claim) = PollClaim::acquire(agent) else {
                continue;
            };
            loops.push(tokio::spawn(Arc::clone(&self.shared).poll(claim)));
        }
        loops
    }

    /// Send one frame to every server.
    ///
    /// Servers whose connection turns out to be dead are dropped; the rest
    /// still get the frame and the first error is returned afterwards.
    async fn broadcast(&self, kind: CommandType, args: &[&[u8]]) -> Result<()> {
        let agents = self.shared.agents.read().await.clone();
        let mut first_error = None;

        for agent in agents {
            if let Err(e) = agent.send(kind, args).await {
                warn!(server = %agent.addr(), command = %kind, error = %e, "Broadcast failed");
                if e.is_fatal() {
                    self.shared.remove_agent(&agent).await;
                }
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// An agent's polling flag, held for as long as its loop exists.
///
/// Dropping the claim clears the flag, also when the loop task is aborted
/// or dropped before it first runs.
struct PollClaim {
    agent: Arc<Agent>,
}

impl PollClaim {
    fn acquire(agent: &Arc<Agent>) -> Option<Self> {
        agent.start_polling().then(|| Self {
            agent: Arc::clone(agent),
        })
    }
}

impl Drop for PollClaim {
    fn drop(&mut self) {
        self.agent.stop_polling();
    }
}

impl Shared {
    async fn poll(self: Arc<Self>, claim: PollClaim) {
        let agent = &claim.agent;
        info!(server = %agent.addr(), "Polling for jobs");

        let error = loop {
            if let Err(e) = self.poll_once(agent).await {
                break e;
            }
        };

        warn!(server = %agent.addr(), error = %error, "Poll loop stopped, removing server");
        self.remove_agent(agent).await;
    }

    /// One `GRAB_JOB` round trip.
    async fn poll_once(&self, agent: &Arc<Agent>) -> Result<()> {
        let grab = if self.grab_unique {
            CommandType::GrabJobUniq
        } else {
            CommandType::GrabJob
        };
        agent.send(grab, &[]).await?;

        let command = agent.receive().await?;
        match command.kind {
            CommandType::NoJob => {
                agent.send(CommandType::PreSleep, &[]).await?;
                agent.receive().await?.expect(CommandType::Noop)?;
                Ok(())
            }
            CommandType::JobAssign | CommandType::JobAssignUniq => {
                self.dispatch(agent, &command).await
            }
            CommandType::Noop => Ok(()),
            _ => Err(command.into_error("NO_JOB or JOB_ASSIGN")),
        }
    }

    async fn dispatch(&self, agent: &Arc<Agent>, command: &Command) -> Result<()> {
        let job = Job::from_assignment(command, agent)?;

        let handler = match job.function_name() {
            Some(name) => self
                .functions
                .read()
                .await
                .get(name)
                .map(|r| Arc::clone(&r.handler)),
            None => None,
        };

        let Some(handler) = handler else {
            debug!(server = %agent.addr(), function = ?job.function(), "No handler, sending CANT_DO");
            return agent
                .send(CommandType::CantDo, &[&job.function()[..]])
                .await;
        };

        // Blocks this loop, not the server, while every slot is busy.
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| GearmanError::ShuttingDown)?;

        debug!(server = %agent.addr(), job = ?job.handle(), function = ?job.function(), "Dispatching job");
        tokio::spawn(run_handler(handler, job, permit));
        Ok(())
    }

    async fn remove_agent(&self, agent: &Arc<Agent>) {
        let mut agents = self.agents.write().await;
        let before = agents.len();
        agents.retain(|a| !Arc::ptr_eq(a, agent));
        if agents.len() < before {
            info!(server = %agent.addr(), remaining = agents.len(), "Removed server");
        }
    }
}

/// Run one handler. The permit is held until this task ends, however it ends.
///
/// The handler runs in a task of its own so a panic surfaces here as a
/// `JoinError` and the job can still be failed.
async fn run_handler(handler: Arc<dyn JobHandler>, job: Job, _permit: OwnedSemaphorePermit) {
    let task = {
        let job = job.clone();
        tokio::spawn(async move { handler.handle(job).await })
    };

    match task.await {
        Ok(Ok(())) if job.is_finished() => {
            debug!(job = ?job.handle(), "Job finished");
        }
        Ok(Ok(())) => {
            warn!(job = ?job.handle(), function = ?job.function(), "Handler returned without completing the job");
        }
        Ok(Err(e)) => {
            warn!(job = ?job.handle(), function = ?job.function(), error = %e, "Job handler failed");
            fail_unfinished(&job).await;
        }
        Err(e) => {
            warn!(job = ?job.handle(), function = ?job.function(), panicked = e.is_panic(), "Job handler aborted");
            fail_unfinished(&job).await;
        }
    }
}

async fn fail_unfinished(job: &Job) {
    if job.is_finished() {
        return;
    }
    if let Err(e) = job.fail().await {
        warn!(job = ?job.handle(), error = %e, "Could not report job failure");
    }
}

async fn announce(agent: &Agent, name: &str, timeout: u32) -> Result<()> {
    let timeout_text = timeout.to_string();
    let (kind, args) = capability(name, timeout, &timeout_text);
    agent.send(kind, &args).await
}

/// `CAN_DO`, or `CAN_DO_TIMEOUT` when a timeout is set.
fn capability<'a>(
    name: &'a str,
    timeout: u32,
    timeout_text: &'a str,
) -> (CommandType, Vec<&'a [u8]>) {
    if timeout > 0 {
        (
            CommandType::CanDoTimeout,
            vec![name.as_bytes(), timeout_text.as_bytes()],
        )
    } else {
        (CommandType::CanDo, vec![name.as_bytes()])
    }
}
