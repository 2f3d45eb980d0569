//! async-gearman library
//!
//! Client and worker for the Gearman job-queue binary protocol:
//! - Frame codec and the command registry (`protocol`)
//! - Per-connection agents over pluggable transports (`agent`, `transport`)
//! - A client that submits jobs and queries their status (`client`)
//! - A worker that polls servers and runs registered handlers (`worker`)

pub mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use client::{Client, JobStatus, Priority, SubmitOptions, Submission, Task};
pub use config::{GearmanConfig, ServerAddr, WorkerConfig};
pub use error::{GearmanError, Result};
pub use protocol::{Command, CommandType};
pub use worker::{Job, JobHandler, Worker};
