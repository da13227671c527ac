//! Target discovery
//!
//! Targets are found fresh every cycle as the union of two runtime queries
//! (by image, by name prefix), deduplicated by id. The agent's own container
//! is excluded both by hostname (the runtime sets it to the short id) and by
//! its reserved name.

use super::{ContainerRuntime, RuntimeContainer};
use crate::error::Result;
use std::collections::HashMap;
use tracing::debug;

/// What to look for and what to skip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    /// Image the targets are created from
    pub image: String,
    /// Name prefix of targets started from other images
    pub name_prefix: String,
    /// Exact name of the agent's own container
    pub self_name: String,
    /// Hostname of the agent; a container whose id starts with it is the agent
    pub self_hostname: Option<String>,
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        Self {
            image: "ghcr.io/psiphon-inc/conduit/cli".to_string(),
            name_prefix: "conduit".to_string(),
            self_name: "conduit-expose".to_string(),
            self_hostname: local_hostname(),
        }
    }
}

impl DiscoveryFilter {
    fn is_self(&self, container: &RuntimeContainer) -> bool {
        if container.name == self.self_name {
            return true;
        }
        matches!(&self.self_hostname, Some(host) if !host.is_empty() && container.id.starts_with(host.as_str()))
    }
}

/// Hostname of this process, if it can be read
pub fn local_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
}

/// List all targets, sorted by name
///
/// Fails only when a runtime query fails; the caller then publishes an
/// empty snapshot for the cycle.
pub async fn discover_targets(
    runtime: &dyn ContainerRuntime,
    filter: &DiscoveryFilter,
) -> Result<Vec<RuntimeContainer>> {
    let mut seen: HashMap<String, RuntimeContainer> = HashMap::new();

    for container in runtime.list_by_image(&filter.image).await? {
        seen.insert(container.id.clone(), container);
    }

    // The runtime's name filter is a substring match
    for container in runtime.list_by_name(&filter.name_prefix).await? {
        if container.name.starts_with(&filter.name_prefix) {
            seen.insert(container.id.clone(), container);
        }
    }

    let mut targets: Vec<RuntimeContainer> = seen
        .into_values()
        .filter(|c| {
            let own = filter.is_self(c);
            if own {
                debug!(container_id = %c.short_id(), name = %c.name, "Skipping own container");
            }
            !own
        })
        .collect();
    targets.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

    Ok(targets)
}
