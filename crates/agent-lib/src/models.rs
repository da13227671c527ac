//! Core data models for the expose agent
//!
//! Everything here is serialized as-is into the `/status` response.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Application metrics scraped from a single target's exposition endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppMetrics {
    pub connected_clients: i64,
    pub connecting_clients: i64,
    pub announcing: i64,
    pub is_live: bool,
    pub bytes_uploaded: f64,
    pub bytes_downloaded: f64,
    pub uptime_seconds: f64,
    pub idle_seconds: f64,
}

/// Per-target settings, from exposition gauges and the restart policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSettings {
    pub max_clients: i64,
    pub bandwidth_limit_mbps: f64,
    pub auto_start: bool,
}

/// Health indicators for a single target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerHealth {
    pub restart_count: i64,
    pub oom_killed: bool,
    pub fd_count: usize,
    pub thread_count: u32,
}

/// Host-level resource usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub load_avg_1m: f64,
    pub load_avg_5m: f64,
    pub load_avg_15m: f64,
    pub disk_used_gb: f64,
    pub disk_total_gb: f64,
    pub net_in_mbps: f64,
    pub net_out_mbps: f64,
    pub net_errors: u64,
    pub net_drops: u64,
}

/// TCP connection counts observed in one or more network namespaces
///
/// `states` uses a sorted map so the JSON output is stable between cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub total: u64,
    pub unique_ips: u64,
    pub states: BTreeMap<String, u64>,
}

impl ConnectionStats {
    /// True when nothing was counted at all
    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.unique_ips == 0 && self.states.values().all(|v| *v == 0)
    }
}

/// Connection (or client) count for one country
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryStats {
    pub country: String,
    pub connections: u64,
}

/// Cumulative traffic for one country, as recorded by the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryTraffic {
    pub country: String,
    pub from_bytes: f64,
    pub to_bytes: f64,
}

/// Rolling session aggregation since the last detected restart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub start_time: i64,
    pub peak_connections: i64,
    pub avg_connections: f64,
    pub total_upload_bytes: f64,
    pub total_download_bytes: f64,
}

/// Aggregated metrics from the auxiliary snowflake proxy fleet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnowflakeMetrics {
    pub total_connections: i64,
    pub timeouts_total: i64,
    pub inbound_bytes: f64,
    pub outbound_bytes: f64,
}

/// One target as it appears in the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub status: TargetStatus,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub uptime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<ContainerHealth>,
    /// Serialized as `null` when the metrics endpoint was unreachable
    pub app_metrics: Option<AppMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ContainerSettings>,
}

/// Lifecycle state of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Running,
    Down,
    Unhealthy,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Running => "running",
            TargetStatus::Down => "down",
            TargetStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level snapshot produced by one collection cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub server_id: String,
    pub timestamp: i64,
    pub total_containers: usize,
    pub connected_clients: i64,
    pub connecting_clients: i64,
    pub manager_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ContainerSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<ConnectionStats>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clients_by_country: Vec<CountryStats>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traffic_by_country: Vec<CountryTraffic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snowflake: Option<SnowflakeMetrics>,
    pub containers: Vec<ContainerInfo>,
}

impl StatusResponse {
    /// Snapshot for a cycle in which targets could not be enumerated
    pub fn empty(server_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            server_id: server_id.into(),
            timestamp,
            total_containers: 0,
            connected_clients: 0,
            connecting_clients: 0,
            manager_available: false,
            system: None,
            settings: None,
            session: None,
            connections: None,
            clients_by_country: Vec::new(),
            traffic_by_country: Vec::new(),
            snowflake: None,
            containers: Vec::new(),
        }
    }
}
