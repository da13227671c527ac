//! Docker Engine API runtime
//!
//! Talks to the local daemon socket through bollard. bollard demultiplexes
//! the 8-byte framed log stream, so log lines arrive already split by stream.

use super::{async_trait, ContainerDetails, ContainerRuntime, ResourceUsage, RuntimeContainer};
use crate::error::{CollectError, Result};
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, LogsOptions, StatsOptions,
};
use bollard::models::{ContainerInspectResponse, ContainerSummary, RestartPolicyNameEnum};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::debug;

/// [`ContainerRuntime`] backed by the Docker Engine API
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the default local socket
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    async fn list(&self, key: &str, value: &str) -> Result<Vec<RuntimeContainer>> {
        let filters = HashMap::from([(key.to_string(), vec![value.to_string()])]);
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(summaries.into_iter().filter_map(summary_to_container).collect())
    }
}

fn summary_to_container(summary: ContainerSummary) -> Option<RuntimeContainer> {
    let id = summary.id?;
    let name = summary
        .names
        .and_then(|names| names.into_iter().next())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();

    Some(RuntimeContainer {
        id,
        name,
        state: summary.state.unwrap_or_default(),
        created: summary.created.unwrap_or_default(),
    })
}

fn inspect_to_details(inspect: ContainerInspectResponse) -> ContainerDetails {
    let state = inspect.state.unwrap_or_default();
    let pid = state
        .pid
        .filter(|pid| *pid > 0)
        .and_then(|pid| u32::try_from(pid).ok());

    let host_config = inspect.host_config.unwrap_or_default();
    let host_network = host_config.network_mode.as_deref() == Some("host");
    let auto_start = matches!(
        host_config.restart_policy.and_then(|p| p.name),
        Some(RestartPolicyNameEnum::ALWAYS | RestartPolicyNameEnum::UNLESS_STOPPED)
    );

    let ip = if host_network {
        Some("127.0.0.1".to_string())
    } else {
        inspect
            .network_settings
            .and_then(|settings| settings.networks)
            .and_then(|networks| {
                let mut names: Vec<&String> = networks.keys().collect();
                names.sort();
                names
                    .into_iter()
                    .filter_map(|name| networks.get(name)?.ip_address.clone())
                    .find(|ip| !ip.is_empty())
            })
    };

    ContainerDetails {
        pid,
        ip,
        restart_count: inspect.restart_count.unwrap_or_default(),
        oom_killed: state.oom_killed.unwrap_or_default(),
        auto_start,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn list_by_image(&self, image: &str) -> Result<Vec<RuntimeContainer>> {
        self.list("ancestor", image).await
    }

    async fn list_by_name(&self, name: &str) -> Result<Vec<RuntimeContainer>> {
        self.list("name", name).await
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        Ok(inspect_to_details(inspect))
    }

    async fn stats(&self, id: &str) -> Result<ResourceUsage> {
        // Not one-shot: the daemon waits for a second sample so precpu is populated
        let mut stream = Box::pin(self.docker.stats(
            id,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        ));
        let stats = stream
            .next()
            .await
            .ok_or_else(|| CollectError::Missing(format!("no stats returned for {id}")))??;

        Ok(ResourceUsage {
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total: stats.precpu_stats.cpu_usage.total_usage,
            system_total: stats.cpu_stats.system_cpu_usage.unwrap_or_default(),
            presystem_total: stats.precpu_stats.system_cpu_usage.unwrap_or_default(),
            online_cpus: stats
                .cpu_stats
                .online_cpus
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or_default(),
            percpu_count: stats
                .cpu_stats
                .cpu_usage
                .percpu_usage
                .map(|v| v.len())
                .unwrap_or_default(),
            memory_usage: stats.memory_stats.usage.unwrap_or_default(),
        })
    }

    async fn tail_logs(&self, id: &str, tail: usize) -> Result<Vec<String>> {
        let mut stream = Box::pin(self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: tail.to_string(),
                ..Default::default()
            }),
        ));

        let mut lines = Vec::new();
        while let Some(frame) = stream.next().await {
            let frame = frame?;
            // A frame may carry several lines
            lines.extend(
                frame
                    .to_string()
                    .lines()
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }
        debug!(container_id = %id, lines = lines.len(), "Read container logs");
        Ok(lines)
    }
}
