//! gearman command-line tool
//!
//! Submits jobs, queries job status, or runs a demo worker against one or
//! more Gearman job servers. Servers come from `--server`, then `--config`,
//! then `GEARMAN_SERVERS`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use async_gearman::{
    protocol::CommandType, Client, GearmanConfig, Job, Priority, ServerAddr, SubmitOptions,
    Submission, Worker,
};

#[derive(Parser, Debug)]
#[command(name = "gearman")]
#[command(about = "Gearman job-queue client and worker")]
struct Args {
    /// Job server address (host[:port] or tls://host[:port]); repeatable
    #[arg(long = "server", short = 's')]
    servers: Vec<ServerAddr>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Submit a job and print its result (or handle, in background mode)
    Submit {
        function: String,
        workload: String,

        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,

        /// Don't wait for the result
        #[arg(long)]
        background: bool,

        /// Dedup token (random if omitted)
        #[arg(long)]
        unique: Option<String>,
    },
    /// Query the status of a job handle
    Status { handle: String },
    /// Round-trip a payload through a server
    Echo { payload: String },
    /// Run a worker serving the `echo` and `reverse` functions
    Worker {
        /// Maximum number of jobs run at once
        #[arg(long)]
        max_jobs: Option<usize>,

        #[arg(long)]
        client_id: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PriorityArg {
    Low,
    Normal,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Low => Self::Low,
            PriorityArg::Normal => Self::Normal,
            PriorityArg::High => Self::High,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout carries only job output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => GearmanConfig::from_file(path)?,
        None => GearmanConfig::from_env().context("Failed to load configuration")?,
    };
    if !args.servers.is_empty() {
        config.servers = args.servers;
    }

    info!(
        servers = ?config.servers.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "Loaded configuration"
    );

    match args.command {
        Mode::Worker {
            max_jobs,
            client_id,
        } => {
            if let Some(max) = max_jobs {
                config.worker.max_concurrent_jobs = max;
            }
            if client_id.is_some() {
                config.worker.client_id = client_id;
            }
            run_worker(config).await
        }
        Mode::Submit {
            function,
            workload,
            priority,
            background,
            unique,
        } => {
            let client = connect_client(&config).await?;
            let options = SubmitOptions {
                unique,
                priority: priority.into(),
                background,
            };
            submit(&client, &function, workload.as_bytes(), options).await
        }
        Mode::Status { handle } => {
            let client = connect_client(&config).await?;
            let status = client.get_status(handle.as_bytes()).await?;
            println!(
                "{} known={} running={} progress={}/{}",
                String::from_utf8_lossy(&status.job_handle),
                status.known,
                status.running,
                status.numerator,
                status.denominator
            );
            Ok(())
        }
        Mode::Echo { payload } => {
            let client = connect_client(&config).await?;
            let echoed = client.echo(payload.as_bytes()).await?;
            println!("{}", String::from_utf8_lossy(&echoed));
            Ok(())
        }
    }
}

async fn connect_client(config: &GearmanConfig) -> Result<Client> {
    let client = Client::new();
    for addr in &config.servers {
        if let Err(e) = client.add_server_addr(addr).await {
            warn!(server = %addr, error = %e, "Skipping server");
        }
    }
    if client.server_count().await == 0 {
        anyhow::bail!("No job server reachable");
    }
    Ok(client)
}

async fn submit(
    client: &Client,
    function: &str,
    workload: &[u8],
    options: SubmitOptions,
) -> Result<()> {
    let task = match client.submit(function, workload, options).await? {
        Submission::Background(handle) => {
            println!("{}", String::from_utf8_lossy(&handle));
            return Ok(());
        }
        Submission::Foreground(task) => task,
    };

    let outcome = task.wait().await.context("Job did not finish")?;
    match outcome.kind {
        CommandType::WorkComplete => {
            let data = outcome.arg("workload").cloned().unwrap_or_default();
            println!("{}", String::from_utf8_lossy(&data));
            Ok(())
        }
        CommandType::WorkException => anyhow::bail!(
            "Job {} raised: {}",
            String::from_utf8_lossy(task.job_handle()),
            outcome.arg_lossy("workload").unwrap_or_default()
        ),
        _ => anyhow::bail!("Job {} failed", String::from_utf8_lossy(task.job_handle())),
    }
}

async fn run_worker(config: GearmanConfig) -> Result<()> {
    let worker = Worker::new(config.worker);
    worker.add_func("echo", echo, 0).await?;
    worker.add_func("reverse", reverse, 0).await?;

    for addr in &config.servers {
        if let Err(e) = worker.add_server_addr(addr).await {
            warn!(server = %addr, error = %e, "Skipping server");
        }
    }
    if worker.server_count().await == 0 {
        anyhow::bail!("No job server reachable");
    }

    for poll_loop in worker.work().await {
        if let Err(e) = poll_loop.await {
            warn!(error = %e, "Poll loop aborted");
        }
    }

    warn!("All servers lost, exiting");
    Ok(())
}

async fn echo(job: Job) -> Result<()> {
    job.complete(job.workload()).await?;
    Ok(())
}

async fn reverse(job: Job) -> Result<()> {
    let mut data = job.workload().to_vec();
    data.reverse();
    job.complete(data).await?;
    Ok(())
}
