//! Client and worker configuration.
//!
//! Servers and worker limits can come from a JSON document (inline or on
//! disk) or from `GEARMAN_*` environment variables.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::error::GearmanError;

/// IANA-assigned Gearman port.
pub const DEFAULT_PORT: u16 = 4730;

const TLS_PREFIX: &str = "tls://";

/// Address of one job server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ServerAddr {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Ask the connector for a secured transport.
    #[serde(default)]
    pub secure: bool,
}

impl ServerAddr {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secure {
            f.write_str(TLS_PREFIX)?;
        }
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parses `host`, `host:port` or `tls://host:port`.
impl FromStr for ServerAddr {
    type Err = GearmanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (secure, rest) = s
            .strip_prefix(TLS_PREFIX)
            .map_or((false, s), |rest| (true, rest));

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| GearmanError::Config(format!("invalid port in '{s}'")))?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(GearmanError::Config(format!("missing host in '{s}'")));
        }

        Ok(Self::new(host, port, secure))
    }
}

/// Worker tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerConfig {
    /// Handlers allowed to run at once, across all servers.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Poll with `GRAB_JOB_UNIQ` so jobs carry the client's unique id.
    #[serde(default)]
    pub grab_unique: bool,

    /// Sent as `SET_CLIENT_ID` to every server.
    #[serde(default)]
    pub client_id: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            grab_unique: false,
            client_id: None,
        }
    }
}

/// Top-level configuration shared by the CLI and embedders.
#[derive(Debug, Clone, Deserialize)]
pub struct GearmanConfig {
    #[serde(default = "default_servers")]
    pub servers: Vec<ServerAddr>,

    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Default for GearmanConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            worker: WorkerConfig::default(),
        }
    }
}

impl GearmanConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse configuration")?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Build from environment variables, falling back to defaults.
    ///
    /// Reads `GEARMAN_SERVERS` (comma-separated addresses), `GEARMAN_MAX_JOBS`
    /// and `GEARMAN_CLIENT_ID`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(servers) = std::env::var("GEARMAN_SERVERS") {
            config.servers = parse_server_list(&servers)?;
        }

        if let Ok(max) = std::env::var("GEARMAN_MAX_JOBS") {
            config.worker.max_concurrent_jobs = max
                .parse()
                .with_context(|| format!("GEARMAN_MAX_JOBS is not a number: '{max}'"))?;
        }

        if let Ok(id) = std::env::var("GEARMAN_CLIENT_ID") {
            config.worker.client_id = Some(id);
        }

        debug!(servers = config.servers.len(), "Loaded configuration from environment");
        Ok(config)
    }
}

/// Parse a comma-separated server list, skipping blank entries.
pub fn parse_server_list(list: &str) -> Result<Vec<ServerAddr>> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse::<ServerAddr>().map_err(anyhow::Error::from))
        .collect()
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_servers() -> Vec<ServerAddr> {
    vec![ServerAddr::new("localhost", DEFAULT_PORT, false)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_addresses() {
        let addr: ServerAddr = "gearman.internal:4731".parse().unwrap();
        assert_eq!(addr, ServerAddr::new("gearman.internal", 4731, false));

        let addr: ServerAddr = "localhost".parse().unwrap();
        assert_eq!(addr.port, DEFAULT_PORT);

        let addr: ServerAddr = "tls://jobs:4443".parse().unwrap();
        assert!(addr.secure);
        assert_eq!(addr.to_string(), "tls://jobs:4443");
    }

    #[test]
    fn reject_bad_addresses() {
        assert!("host:notaport".parse::<ServerAddr>().is_err());
        assert!(":4730".parse::<ServerAddr>().is_err());
        assert!("host:70000".parse::<ServerAddr>().is_err());
    }

    #[test]
    fn server_list_skips_blanks() {
        let servers = parse_server_list("a:1, b ,,").unwrap();
        assert_eq!(
            servers,
            vec![ServerAddr::new("a", 1, false), ServerAddr::new("b", DEFAULT_PORT, false)]
        );
    }

    #[test]
    fn parse_json_with_defaults() {
        let json = r#"{
            "servers": [
                {"host": "10.0.0.1"},
                {"host": "10.0.0.2", "port": 4731, "secure": true}
            ]
        }"#;

        let config = GearmanConfig::from_json(json).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].port, DEFAULT_PORT);
        assert!(!config.servers[0].secure);
        assert!(config.servers[1].secure);

        // Worker section absent: defaults apply
        assert_eq!(config.worker, WorkerConfig::default());
        assert_eq!(config.worker.max_concurrent_jobs, 5);
    }

    #[test]
    fn parse_json_worker_section() {
        let json = r#"{
            "worker": {"max_concurrent_jobs": 2, "grab_unique": true, "client_id": "w-1"}
        }"#;
        let config = GearmanConfig::from_json(json).unwrap();
        assert_eq!(config.servers, default_servers());
        assert_eq!(config.worker.max_concurrent_jobs, 2);
        assert!(config.worker.grab_unique);
        assert_eq!(config.worker.client_id.as_deref(), Some("w-1"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gearman.json");
        std::fs::write(&path, r#"{"servers": [{"host": "jobs", "port": 9000}]}"#).unwrap();

        let config = GearmanConfig::from_file(&path).unwrap();
        assert_eq!(config.servers, vec![ServerAddr::new("jobs", 9000, false)]);
    }

    #[test]
    fn load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = GearmanConfig::from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }
}
