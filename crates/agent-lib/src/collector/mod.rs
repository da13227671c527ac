//! Target collection
//!
//! This module discovers sibling workload containers and samples each one
//! through several independent interfaces: the container runtime API, the
//! host's `/proc` tree and the target's own metrics endpoint. Host-wide and
//! auxiliary-fleet collectors live alongside. The [`CollectionLoop`] drives
//! all of them once per interval.

mod discovery;
mod docker;
mod host;
mod r#loop;
mod snowflake;
mod target;

#[cfg(test)]
mod tests;

pub use discovery::{discover_targets, DiscoveryFilter};
pub use docker::DockerRuntime;
pub use host::{HostCollector, HostReadings};
pub use r#loop::{CollectionConfig, CollectionLoop, CollectionLoopBuilder};
pub use snowflake::collect_snowflake;
pub use target::{bounded, TargetCollector};

use crate::error::Result;
use std::time::Duration;

pub use async_trait::async_trait;

/// A container as returned by a list call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContainer {
    /// Full container id
    pub id: String,
    /// Name without the leading `/`
    pub name: String,
    /// Runtime lifecycle state (`running`, `exited`, ...)
    pub state: String,
    /// Creation time, Unix seconds
    pub created: i64,
}

impl RuntimeContainer {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    /// The first 12 characters of the id
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }
}

/// The parts of an inspect result the collector uses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    /// Main process id in the host pid namespace, `None` when not running
    pub pid: Option<u32>,
    /// Address the metrics endpoint is reachable on; loopback for host networking
    pub ip: Option<String>,
    pub restart_count: i64,
    pub oom_killed: bool,
    /// Restart policy is `always` or `unless-stopped`
    pub auto_start: bool,
}

/// One resource-usage sample with its predecessor, as the runtime reports it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system_total: u64,
    pub presystem_total: u64,
    pub online_cpus: u32,
    pub percpu_count: usize,
    pub memory_usage: u64,
}

impl ResourceUsage {
    /// `(Δcontainer / Δsystem) × cpus × 100`, zero when the system delta is not positive
    pub fn cpu_percent(&self) -> f64 {
        if self.cpu_total < self.precpu_total || self.system_total <= self.presystem_total {
            return 0.0;
        }
        let cpu_delta = (self.cpu_total - self.precpu_total) as f64;
        let system_delta = (self.system_total - self.presystem_total) as f64;
        let cpus = match (self.online_cpus, self.percpu_count) {
            (0, 0) => 1.0,
            (0, n) => n as f64,
            (n, _) => n as f64,
        };
        crate::state::round2(cpu_delta / system_delta * cpus * 100.0)
    }

    pub fn memory_mb(&self) -> f64 {
        crate::state::round2(self.memory_usage as f64 / 1024.0 / 1024.0)
    }
}

/// Container runtime operations the collector depends on
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check the runtime is reachable
    async fn ping(&self) -> Result<()>;

    /// All containers (any state) created from `image`
    async fn list_by_image(&self, image: &str) -> Result<Vec<RuntimeContainer>>;

    /// All containers (any state) whose name contains `name`
    async fn list_by_name(&self, name: &str) -> Result<Vec<RuntimeContainer>>;

    async fn inspect(&self, id: &str) -> Result<ContainerDetails>;

    /// One resource-usage sample
    async fn stats(&self, id: &str) -> Result<ResourceUsage>;

    /// The most recent `tail` lines of combined stdout/stderr
    async fn tail_logs(&self, id: &str, tail: usize) -> Result<Vec<String>>;
}

/// Per-step time bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Runtime API calls (list, inspect, stats, logs)
    pub runtime: Duration,
    /// Metrics endpoint fetches
    pub metrics: Duration,
    /// Local file reads under `/proc` and the manager directory
    pub files: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            runtime: Duration::from_secs(5),
            metrics: Duration::from_secs(3),
            files: Duration::from_secs(2),
        }
    }
}
