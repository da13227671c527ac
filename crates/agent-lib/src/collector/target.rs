//! Per-target collection
//!
//! One call gathers everything for a single target: resource usage and
//! metadata from the runtime, health and the TCP tables from `/proc`, and
//! application metrics from the target's exposition endpoint. Every step is
//! time-bounded and cancellable, and a failed step only leaves its own
//! field empty.

use super::{ContainerDetails, ContainerRuntime, RuntimeContainer, Timeouts};
use crate::aggregate::TargetSample;
use crate::error::{CollectError, Result};
use crate::geoip::CountryLookup;
use crate::models::{AppMetrics, ContainerHealth, ContainerInfo, ContainerSettings, TargetStatus};
use crate::observability::AgentMetrics;
use crate::parsers::exposition::MetricField;
use crate::parsers::{
    collect_connections, format_uptime, last_stats_line, parse_metrics, parse_stats_line,
    ParsedMetrics,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Number of log lines searched for a stats line
const LOG_TAIL_LINES: usize = 200;

/// Run `fut` until it finishes, `limit` elapses or `token` is cancelled
pub async fn bounded<T, F>(
    token: &CancellationToken,
    limit: Duration,
    step: &'static str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = token.cancelled() => Err(CollectError::Cancelled),
        res = tokio::time::timeout(limit, fut) => res.map_err(|_| CollectError::Timeout(step))?,
    }
}

/// GET an exposition document and parse it
pub(crate) async fn fetch_metrics(client: &reqwest::Client, url: &str) -> Result<ParsedMetrics> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(CollectError::HttpStatus(response.status().as_u16()));
    }
    let body = response.text().await?;
    Ok(parse_metrics(&body))
}

/// Count entries of `/proc/<pid>/fd`
async fn count_fds(proc_root: &Path, pid: u32) -> Result<usize> {
    let mut entries = fs::read_dir(proc_root.join(pid.to_string()).join("fd")).await?;
    let mut count = 0;
    while entries.next_entry().await?.is_some() {
        count += 1;
    }
    Ok(count)
}

/// The `Threads:` line of `/proc/<pid>/status`
async fn read_thread_count(proc_root: &Path, pid: u32) -> Result<u32> {
    let status = fs::read_to_string(proc_root.join(pid.to_string()).join("status")).await?;
    parse_thread_count(&status).ok_or_else(|| CollectError::Missing("Threads".to_string()))
}

pub(crate) fn parse_thread_count(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// A target entry with only identity and status filled in
pub(crate) fn base_info(container: &RuntimeContainer, status: TargetStatus) -> ContainerInfo {
    ContainerInfo {
        id: container.short_id().to_string(),
        name: container.name.clone(),
        status,
        cpu_percent: 0.0,
        memory_mb: 0.0,
        uptime: "0s".to_string(),
        health: None,
        app_metrics: None,
        settings: None,
    }
}

/// Collects one target per call
pub struct TargetCollector {
    runtime: Arc<dyn ContainerRuntime>,
    http: reqwest::Client,
    proc_root: PathBuf,
    metrics_port: u16,
    metrics_path: String,
    timeouts: Timeouts,
    geo: Option<Arc<dyn CountryLookup>>,
    log_fallback: bool,
    agent_metrics: AgentMetrics,
}

impl TargetCollector {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        proc_root: impl Into<PathBuf>,
        metrics_port: u16,
        metrics_path: impl Into<String>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            runtime,
            http: reqwest::Client::new(),
            proc_root: proc_root.into(),
            metrics_port,
            metrics_path: metrics_path.into(),
            timeouts,
            geo: None,
            log_fallback: false,
            agent_metrics: AgentMetrics::new(),
        }
    }

    pub fn with_geo(mut self, geo: Option<Arc<dyn CountryLookup>>) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_log_fallback(mut self, enabled: bool) -> Self {
        self.log_fallback = enabled;
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    fn degrade(&self, target: &str, step: &'static str, error: &CollectError) {
        self.agent_metrics.inc_target_degradation(step, error.kind());
        match error {
            CollectError::Cancelled => {
                debug!(container = %target, step = step, "Collection step cancelled");
            }
            _ => {
                warn!(container = %target, step = step, error = %error, "Collection step failed");
            }
        }
    }

    /// Collect a single target; never fails
    pub async fn collect(
        &self,
        container: RuntimeContainer,
        token: &CancellationToken,
    ) -> TargetSample {
        let mut info = base_info(&container, TargetStatus::Running);

        if !container.is_running() {
            info.status = TargetStatus::Down;
            return TargetSample::new(info);
        }

        let age = chrono::Utc::now().timestamp() - container.created;
        info.uptime = format_uptime(age.max(0) as u64);

        match bounded(token, self.timeouts.runtime, "stats", self.runtime.stats(&container.id)).await
        {
            Ok(usage) => {
                info.cpu_percent = usage.cpu_percent();
                info.memory_mb = usage.memory_mb();
            }
            Err(e) => {
                self.degrade(&container.name, "stats", &e);
                info.status = TargetStatus::Unhealthy;
            }
        }

        let details = match bounded(
            token,
            self.timeouts.runtime,
            "inspect",
            self.runtime.inspect(&container.id),
        )
        .await
        {
            Ok(details) => Some(details),
            Err(e) => {
                self.degrade(&container.name, "inspect", &e);
                None
            }
        };

        let mut sample = TargetSample::new(info);
        let Some(details) = details else {
            return sample;
        };

        sample.info.health = Some(self.health(&container.name, &details, token).await);

        if let Some(pid) = details.pid {
            let geo = self.geo.as_deref();
            let read = async {
                Ok::<_, CollectError>(collect_connections(&self.proc_root, pid, geo).await)
            };
            match bounded(token, self.timeouts.files, "connections", read).await {
                Ok(summary) => sample.connections = Some(summary),
                Err(e) => self.degrade(&container.name, "connections", &e),
            }
        }

        let (app_metrics, settings) = self.app_metrics(&container, &details, token).await;
        sample.info.app_metrics = app_metrics;
        sample.info.settings = settings;

        sample
    }

    async fn health(
        &self,
        name: &str,
        details: &ContainerDetails,
        token: &CancellationToken,
    ) -> ContainerHealth {
        let mut health = ContainerHealth {
            restart_count: details.restart_count,
            oom_killed: details.oom_killed,
            ..Default::default()
        };

        let Some(pid) = details.pid else {
            return health;
        };

        match bounded(token, self.timeouts.files, "fd_count", count_fds(&self.proc_root, pid)).await {
            Ok(count) => health.fd_count = count,
            Err(e) => self.degrade(name, "fd_count", &e),
        }
        match bounded(
            token,
            self.timeouts.files,
            "thread_count",
            read_thread_count(&self.proc_root, pid),
        )
        .await
        {
            Ok(threads) => health.thread_count = threads,
            Err(e) => self.degrade(name, "thread_count", &e),
        }

        health
    }

    /// Application metrics and settings from the endpoint, or the log fallback
    async fn app_metrics(
        &self,
        container: &RuntimeContainer,
        details: &ContainerDetails,
        token: &CancellationToken,
    ) -> (Option<AppMetrics>, Option<ContainerSettings>) {
        match &details.ip {
            Some(ip) => {
                let url = format!("http://{}:{}{}", ip, self.metrics_port, self.metrics_path);
                match bounded(
                    token,
                    self.timeouts.metrics,
                    "metrics",
                    fetch_metrics(&self.http, &url),
                )
                .await
                {
                    Ok(parsed) => {
                        let has_settings = parsed.get(MetricField::MaxClients).is_some()
                            || parsed
                                .get(MetricField::BandwidthLimitBytesPerSecond)
                                .is_some();
                        let settings = has_settings.then(|| parsed.settings(details.auto_start));
                        return (Some(parsed.app_metrics()), settings);
                    }
                    Err(e) => self.degrade(&container.name, "metrics", &e),
                }
            }
            None => {
                let missing = CollectError::Missing("container address".to_string());
                self.degrade(&container.name, "address", &missing);
            }
        }

        if !self.log_fallback || token.is_cancelled() {
            return (None, None);
        }

        match bounded(
            token,
            self.timeouts.runtime,
            "logs",
            self.runtime.tail_logs(&container.id, LOG_TAIL_LINES),
        )
        .await
        {
            Ok(lines) => {
                let metrics =
                    last_stats_line(lines.iter().map(String::as_str)).and_then(parse_stats_line);
                if metrics.is_some() {
                    debug!(container = %container.name, "Using stats log line for app metrics");
                }
                (metrics, None)
            }
            Err(e) => {
                self.degrade(&container.name, "logs", &e);
                (None, None)
            }
        }
    }
}
