//! Collection loop
//!
//! Every tick starts a fresh cycle: discover targets, fan out one bounded
//! worker per target, read the host, manager and snowflake sources, merge
//! everything and publish the snapshot. A slow cycle never delays the next
//! tick; the cache drops its result if a newer cycle published first.

use super::host::HostCollector;
use super::snowflake::collect_snowflake;
use super::target::{base_info, TargetCollector};
use super::{bounded, discover_targets, ContainerRuntime, DiscoveryFilter, Timeouts};
use crate::aggregate::{build_snapshot, CycleResults, TargetSample};
use crate::cache::StatusCache;
use crate::error::CollectError;
use crate::geoip::CountryLookup;
use crate::health::{components, HealthRegistry};
use crate::manager::{ManagerData, ManagerReader};
use crate::models::{StatusResponse, SystemMetrics, TargetStatus};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::state::{RateState, SessionTracker};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Consecutive discovery failures after which the runtime is reported unhealthy
const DISCOVERY_FAILURES_UNHEALTHY: u32 = 3;

/// Configuration for the collection loop
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Time between cycle starts (default: 15 seconds)
    pub interval: Duration,
    /// Maximum targets collected concurrently (default: 10)
    pub max_workers: usize,
    pub timeouts: Timeouts,
    /// Host `/proc` as mounted into the agent
    pub proc_root: PathBuf,
    /// Host root filesystem, used for disk usage
    pub host_root: PathBuf,
    /// Manager state directory
    pub manager_dir: PathBuf,
    /// Port of every target's metrics endpoint
    pub metrics_port: u16,
    pub metrics_path: String,
    pub discovery: DiscoveryFilter,
    /// Port of the first snowflake proxy; later ones count down
    pub snowflake_base_port: u16,
    /// Read app metrics from the `[STATS]` log line when the endpoint fails
    pub log_stats_fallback: bool,
    /// Identifier stamped on every snapshot
    pub server_id: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            max_workers: 10,
            timeouts: Timeouts::default(),
            proc_root: PathBuf::from("/host/proc"),
            host_root: PathBuf::from("/host/root"),
            manager_dir: PathBuf::from("/host/conduit"),
            metrics_port: 9090,
            metrics_path: "/metrics".to_string(),
            discovery: DiscoveryFilter::default(),
            snowflake_base_port: 10000,
            log_stats_fallback: false,
            server_id: super::discovery::local_hostname().unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

struct Shared {
    config: CollectionConfig,
    runtime: Arc<dyn ContainerRuntime>,
    targets: Arc<TargetCollector>,
    host: HostCollector,
    manager: ManagerReader,
    http: reqwest::Client,
    rates: Mutex<RateState>,
    session: SessionTracker,
    cache: StatusCache,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    cycles: AtomicU64,
    discovery_failures: AtomicU32,
    manager_seen: Mutex<Option<bool>>,
}

/// Periodic driver of collection cycles
#[derive(Clone)]
pub struct CollectionLoop {
    shared: Arc<Shared>,
}

impl CollectionLoop {
    pub fn cache(&self) -> StatusCache {
        self.shared.cache.clone()
    }

    pub fn health(&self) -> HealthRegistry {
        self.shared.health.clone()
    }

    pub fn session(&self) -> &SessionTracker {
        &self.shared.session
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.shared.config
    }

    /// Drive cycles until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.shared.config.interval.as_secs(),
            max_workers = self.shared.config.max_workers,
            "Starting collection loop"
        );

        let mut ticker = interval(self.shared.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutting down collection loop");
                    break;
                }
                _ = ticker.tick() => {
                    let this = self.clone();
                    let token = shutdown.child_token();
                    cycles.spawn(async move {
                        this.run_cycle(&token).await;
                    });
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Collection cycle task failed");
                    }
                }
            }
        }

        // In-flight cycles observe the cancelled token and return promptly
        while cycles.join_next().await.is_some() {}
    }

    /// Run one cycle and publish its snapshot
    ///
    /// Returns whether the snapshot became visible.
    pub async fn run_cycle(&self, token: &CancellationToken) -> bool {
        let shared = &self.shared;
        let cycle = shared.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let start = Instant::now();

        let status = match self.collect(cycle, token).await {
            Some(status) => status,
            None => {
                debug!(cycle = cycle, "Cycle cancelled before publishing");
                return false;
            }
        };

        let degraded = status
            .containers
            .iter()
            .filter(|c| c.status != TargetStatus::Running || c.app_metrics.is_none())
            .count();
        let (targets, connected, manager_available, timestamp) = (
            status.containers.len(),
            status.connected_clients,
            status.manager_available,
            status.timestamp,
        );

        let published = shared.cache.publish(cycle, status).await;
        let elapsed = start.elapsed().as_secs_f64();
        shared.metrics.observe_cycle_duration(elapsed);

        if published {
            shared.metrics.set_last_publish(timestamp);
            shared.health.set_ready(true).await;
            shared
                .logger
                .log_cycle(cycle, targets, degraded, connected, manager_available, elapsed);
        } else {
            shared.metrics.inc_snapshots_discarded();
        }

        published
    }

    /// Gather and merge one cycle; `None` when cancelled midway
    async fn collect(&self, cycle: u64, token: &CancellationToken) -> Option<StatusResponse> {
        let shared = &self.shared;
        let config = &shared.config;

        let discovered = bounded(
            token,
            config.timeouts.runtime,
            "discovery",
            discover_targets(shared.runtime.as_ref(), &config.discovery),
        )
        .await;

        let containers = match discovered {
            Ok(containers) => {
                shared.discovery_failures.store(0, Ordering::SeqCst);
                shared.health.set_healthy(components::RUNTIME).await;
                containers
            }
            Err(e) if token.is_cancelled() => {
                debug!(cycle = cycle, error = %e, "Discovery interrupted");
                return None;
            }
            Err(e) => {
                shared.metrics.inc_discovery_failures();
                shared.logger.log_discovery_failure(cycle, &e);
                let failures = shared.discovery_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= DISCOVERY_FAILURES_UNHEALTHY {
                    shared
                        .health
                        .set_unhealthy(
                            components::RUNTIME,
                            format!("{failures} consecutive discovery failures: {e}"),
                        )
                        .await;
                } else {
                    shared
                        .health
                        .set_degraded(components::RUNTIME, e.to_string())
                        .await;
                }
                return Some(StatusResponse::empty(
                    config.server_id.clone(),
                    chrono::Utc::now().timestamp(),
                ));
            }
        };
        shared.metrics.set_targets_discovered(containers.len() as i64);

        let (targets, system, manager) = tokio::join!(
            self.collect_targets(containers, token),
            self.collect_host(cycle, token),
            self.collect_manager(token),
        );
        let snowflake = collect_snowflake(
            &shared.http,
            manager.settings.as_ref(),
            config.snowflake_base_port,
            token,
            config.timeouts.metrics,
        )
        .await;

        if token.is_cancelled() {
            return None;
        }
        shared.health.set_healthy(components::COLLECTOR).await;

        let results = CycleResults {
            cycle,
            server_id: config.server_id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            targets,
            system,
            manager,
            snowflake,
        };
        Some(build_snapshot(results, &shared.session))
    }

    /// One worker per target, at most `max_workers` in flight, results in discovery order
    async fn collect_targets(
        &self,
        containers: Vec<super::RuntimeContainer>,
        token: &CancellationToken,
    ) -> Vec<TargetSample> {
        let semaphore = Arc::new(Semaphore::new(self.shared.config.max_workers.max(1)));

        let handles: Vec<_> = containers
            .into_iter()
            .map(|container| {
                let fallback = base_info(&container, TargetStatus::Unhealthy);
                let semaphore = semaphore.clone();
                let collector = self.shared.targets.clone();
                let token = token.clone();
                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok()?;
                    Some(collector.collect(container, &token).await)
                });
                (fallback, handle)
            })
            .collect();

        let mut samples = Vec::with_capacity(handles.len());
        for (fallback, handle) in handles {
            match handle.await {
                Ok(Some(sample)) => samples.push(sample),
                Ok(None) => samples.push(TargetSample::new(fallback)),
                Err(e) => {
                    warn!(container = %fallback.name, error = %e, "Target worker failed");
                    samples.push(TargetSample::new(fallback));
                }
            }
        }
        samples
    }

    async fn collect_host(&self, cycle: u64, token: &CancellationToken) -> Option<SystemMetrics> {
        let shared = &self.shared;
        let read = async { Ok::<_, CollectError>(shared.host.read().await) };

        let readings = match bounded(token, shared.config.timeouts.files, "host", read).await {
            Ok(readings) => readings?,
            Err(e) => {
                warn!(error = %e, "Host metrics unavailable");
                return None;
            }
        };

        let mut rates = shared.rates.lock().unwrap_or_else(|e| e.into_inner());
        Some(readings.into_metrics(&mut rates, cycle))
    }

    async fn collect_manager(&self, token: &CancellationToken) -> ManagerData {
        let shared = &self.shared;
        let read = async { Ok::<_, CollectError>(shared.manager.read().await) };

        let data = match bounded(token, shared.config.timeouts.files, "manager", read).await {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Manager data unavailable");
                ManagerData::default()
            }
        };

        let changed = {
            let mut seen = shared.manager_seen.lock().unwrap_or_else(|e| e.into_inner());
            let changed = *seen != Some(data.available);
            *seen = Some(data.available);
            changed
        };
        if changed {
            shared.logger.log_source_change("manager", data.available);
            if data.available {
                shared.health.set_healthy(components::MANAGER).await;
            } else {
                shared
                    .health
                    .set_degraded(components::MANAGER, "Manager directory not readable")
                    .await;
            }
        }

        data
    }
}

/// Builder for the collection loop
pub struct CollectionLoopBuilder {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    config: CollectionConfig,
    geo: Option<Arc<dyn CountryLookup>>,
    cache: Option<StatusCache>,
    health: Option<HealthRegistry>,
    http: Option<reqwest::Client>,
}

impl CollectionLoopBuilder {
    pub fn new() -> Self {
        Self {
            runtime: None,
            config: CollectionConfig::default(),
            geo: None,
            cache: None,
            health: None,
            http: None,
        }
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn config(mut self, config: CollectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers;
        self
    }

    /// Country resolver for self-observed connections
    pub fn geo(mut self, geo: Option<Arc<dyn CountryLookup>>) -> Self {
        self.geo = geo;
        self
    }

    /// Share a cache with the HTTP layer
    pub fn cache(mut self, cache: StatusCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn build(self) -> Result<CollectionLoop> {
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("Container runtime is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Collection interval must be positive");
        }

        let config = self.config;
        let http = self.http.unwrap_or_default();
        let targets = TargetCollector::new(
            runtime.clone(),
            config.proc_root.clone(),
            config.metrics_port,
            config.metrics_path.clone(),
            config.timeouts,
        )
        .with_geo(self.geo)
        .with_log_fallback(config.log_stats_fallback)
        .with_http_client(http.clone());

        let shared = Shared {
            host: HostCollector::new(config.proc_root.clone(), config.host_root.clone()),
            manager: ManagerReader::new(config.manager_dir.clone()),
            logger: StructuredLogger::new(config.server_id.clone()),
            runtime,
            targets: Arc::new(targets),
            http,
            rates: Mutex::new(RateState::new()),
            session: SessionTracker::new(),
            cache: self.cache.unwrap_or_default(),
            health: self.health.unwrap_or_default(),
            metrics: AgentMetrics::new(),
            cycles: AtomicU64::new(0),
            discovery_failures: AtomicU32::new(0),
            manager_seen: Mutex::new(None),
            config,
        };

        Ok(CollectionLoop {
            shared: Arc::new(shared),
        })
    }
}

impl Default for CollectionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
