//! Health tracking for the expose agent
//!
//! Components report their own status; the HTTP layer turns the registry
//! into `/health` and `/readyz` responses. Readiness flips once the first
//! snapshot has been published.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Working normally
    Healthy,
    /// Partially working, snapshots still produced
    Degraded,
    /// Not working
    Unhealthy,
}

impl ComponentStatus {
    /// Snapshots are still being produced
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

/// Last reported state of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix time the component entered `status`
    pub since: i64,
    /// Unix time of the latest report
    pub last_check_timestamp: i64,
}

/// Body of `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names
pub mod components {
    /// Container runtime API
    pub const RUNTIME: &str = "runtime";
    /// Collection loop
    pub const COLLECTOR: &str = "collector";
    /// Manager state files
    pub const MANAGER: &str = "manager";
    /// GeoIP database
    pub const GEOIP: &str = "geoip";
}

#[derive(Debug, Default)]
struct Registry {
    components: BTreeMap<String, ComponentHealth>,
    published: bool,
}

impl Registry {
    fn overall(&self) -> ComponentStatus {
        self.components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Shared registry of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<RwLock<Registry>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let now = chrono::Utc::now().timestamp();
        let mut inner = self.inner.write().await;
        let since = match inner.components.get(name) {
            Some(previous) if previous.status == status => previous.since,
            _ => now,
        };
        inner.components.insert(
            name.to_string(),
            ComponentHealth {
                status,
                message,
                since,
                last_check_timestamp: now,
            },
        );
    }

    /// Mark whether a snapshot has been published
    pub async fn set_ready(&self, ready: bool) {
        self.inner.write().await.published = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let inner = self.inner.read().await;
        HealthResponse {
            status: inner.overall(),
            components: inner.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let inner = self.inner.read().await;
        let reason = if !inner.published {
            Some("No snapshot published yet")
        } else if !inner.overall().is_operational() {
            Some("Critical component unhealthy")
        } else {
            None
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}
