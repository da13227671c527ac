//! Agent configuration

use anyhow::{bail, Context, Result};
use expose_lib::{CollectionConfig, DiscoveryFilter, Timeouts};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration, read from `CONDUIT_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Address the HTTP server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Shared secret expected in the `X-Conduit-Auth` header
    #[serde(default)]
    pub auth_secret: Option<String>,

    /// Identifier stamped on every snapshot (default: hostname)
    #[serde(default)]
    pub server_id: Option<String>,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Seconds between collection cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_docker_timeout")]
    pub docker_timeout_secs: u64,

    #[serde(default = "default_metrics_timeout")]
    pub metrics_timeout_secs: u64,

    /// Targets collected concurrently
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_host_proc")]
    pub host_proc: PathBuf,

    #[serde(default = "default_host_root")]
    pub host_root: PathBuf,

    #[serde(default = "default_geoip_path")]
    pub geoip_path: PathBuf,

    /// Manager directory holding `settings.conf` and `traffic_stats/`
    #[serde(default = "default_manager_dir")]
    pub manager_dir: PathBuf,

    #[serde(default = "default_target_image")]
    pub target_image: String,

    #[serde(default = "default_target_name_prefix")]
    pub target_name_prefix: String,

    /// Reserved name of the agent's own container
    #[serde(default = "default_self_name")]
    pub self_name: String,

    #[serde(default = "default_snowflake_base_port")]
    pub snowflake_base_port: u16,

    /// Fall back to the `[STATS]` log line when a metrics endpoint fails
    #[serde(default)]
    pub log_stats_fallback: bool,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_poll_interval() -> u64 {
    15
}

fn default_docker_timeout() -> u64 {
    5
}

fn default_metrics_timeout() -> u64 {
    3
}

fn default_max_workers() -> usize {
    10
}

fn default_host_proc() -> PathBuf {
    PathBuf::from("/host/proc")
}

fn default_host_root() -> PathBuf {
    PathBuf::from("/host/root")
}

fn default_geoip_path() -> PathBuf {
    PathBuf::from("/data/GeoLite2-Country.mmdb")
}

fn default_manager_dir() -> PathBuf {
    PathBuf::from("/host/conduit")
}

fn default_target_image() -> String {
    "ghcr.io/psiphon-inc/conduit/cli".to_string()
}

fn default_target_name_prefix() -> String {
    "conduit".to_string()
}

fn default_self_name() -> String {
    "conduit-expose".to_string()
}

fn default_snowflake_base_port() -> u16 {
    10000
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix("CONDUIT"))
    }

    fn from_environment(environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment.try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        let agent: AgentConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;

        if agent.poll_interval_secs == 0 {
            bail!("CONDUIT_POLL_INTERVAL_SECS must be positive");
        }
        if agent.max_workers == 0 {
            bail!("CONDUIT_MAX_WORKERS must be positive");
        }
        Ok(agent)
    }

    /// The auth secret; startup cannot continue without one
    pub fn require_secret(&self) -> Result<String> {
        match self.auth_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => Ok(secret.to_string()),
            _ => bail!("CONDUIT_AUTH_SECRET is required"),
        }
    }

    pub fn to_collection_config(&self) -> CollectionConfig {
        let defaults = CollectionConfig::default();
        CollectionConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_workers: self.max_workers,
            timeouts: Timeouts {
                runtime: Duration::from_secs(self.docker_timeout_secs),
                metrics: Duration::from_secs(self.metrics_timeout_secs),
                files: defaults.timeouts.files,
            },
            proc_root: self.host_proc.clone(),
            host_root: self.host_root.clone(),
            manager_dir: self.manager_dir.clone(),
            metrics_port: self.metrics_port,
            metrics_path: self.metrics_path.clone(),
            discovery: DiscoveryFilter {
                image: self.target_image.clone(),
                name_prefix: self.target_name_prefix.clone(),
                self_name: self.self_name.clone(),
                self_hostname: defaults.discovery.self_hostname,
            },
            snowflake_base_port: self.snowflake_base_port,
            log_stats_fallback: self.log_stats_fallback,
            server_id: self
                .server_id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or(defaults.server_id),
        }
    }
}
