//! Observability of the agent itself
//!
//! Provides:
//! - Prometheus metrics (cycle latency, discovered targets, degradations, publish time)
//! - Structured logging of lifecycle and cycle events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Cycle latency buckets (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0, 60.0];

static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    cycle_duration_seconds: Histogram,
    targets_discovered: IntGauge,
    target_degradations: IntCounterVec,
    discovery_failures: IntCounter,
    snapshots_discarded: IntCounter,
    last_publish_timestamp: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "conduit_expose_cycle_duration_seconds",
                "Time spent on one discovery, collection and merge cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            targets_discovered: register_int_gauge!(
                "conduit_expose_targets_discovered",
                "Number of targets found by the last discovery"
            )
            .expect("Failed to register targets_discovered"),

            target_degradations: register_int_counter_vec!(
                "conduit_expose_target_degradations_total",
                "Per-target collection steps that failed and were left empty",
                &["step", "kind"]
            )
            .expect("Failed to register target_degradations"),

            discovery_failures: register_int_counter!(
                "conduit_expose_discovery_failures_total",
                "Cycles in which targets could not be enumerated"
            )
            .expect("Failed to register discovery_failures"),

            snapshots_discarded: register_int_counter!(
                "conduit_expose_snapshots_discarded_total",
                "Snapshots dropped because a newer cycle had already published"
            )
            .expect("Failed to register snapshots_discarded"),

            last_publish_timestamp: register_int_gauge!(
                "conduit_expose_last_publish_timestamp_seconds",
                "Unix time of the most recently published snapshot"
            )
            .expect("Failed to register last_publish_timestamp"),
        }
    }
}

/// Handle to the process-wide agent metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a handle, registering the metrics on first use
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    pub fn set_targets_discovered(&self, count: i64) {
        self.inner().targets_discovered.set(count);
    }

    /// Count one failed per-target step, labeled by step and error kind
    pub fn inc_target_degradation(&self, step: &str, kind: &str) {
        self.inner()
            .target_degradations
            .with_label_values(&[step, kind])
            .inc();
    }

    pub fn inc_discovery_failures(&self) {
        self.inner().discovery_failures.inc();
    }

    pub fn inc_snapshots_discarded(&self) {
        self.inner().snapshots_discarded.inc();
    }

    pub fn set_last_publish(&self, timestamp: i64) {
        self.inner().last_publish_timestamp.set(timestamp);
    }
}

/// Structured logger for agent events
#[derive(Clone)]
pub struct StructuredLogger {
    server_id: String,
}

impl StructuredLogger {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
        }
    }

    pub fn log_startup(&self, version: &str, poll_interval_secs: u64, max_workers: usize) {
        info!(
            event = "agent_started",
            server_id = %self.server_id,
            agent_version = %version,
            poll_interval_secs = poll_interval_secs,
            max_workers = max_workers,
            "Conduit expose agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            server_id = %self.server_id,
            reason = %reason,
            "Conduit expose agent shutting down"
        );
    }

    /// Log a published cycle
    pub fn log_cycle(
        &self,
        cycle: u64,
        targets: usize,
        degraded: usize,
        connected_clients: i64,
        manager_available: bool,
        duration_secs: f64,
    ) {
        info!(
            event = "cycle_completed",
            server_id = %self.server_id,
            cycle = cycle,
            targets = targets,
            degraded_targets = degraded,
            connected_clients = connected_clients,
            manager_available = manager_available,
            duration_secs = duration_secs,
            "Collection cycle completed"
        );
    }

    pub fn log_discovery_failure(&self, cycle: u64, error: &dyn std::fmt::Display) {
        warn!(
            event = "discovery_failed",
            server_id = %self.server_id,
            cycle = cycle,
            error = %error,
            "Target discovery failed, publishing empty snapshot"
        );
    }

    /// Log a data source appearing or disappearing
    pub fn log_source_change(&self, source: &str, available: bool) {
        if available {
            info!(
                event = "source_available",
                server_id = %self.server_id,
                source = %source,
                "Data source became available"
            );
        } else {
            warn!(
                event = "source_unavailable",
                server_id = %self.server_id,
                source = %source,
                "Data source unavailable, section omitted from snapshots"
            );
        }
    }
}
