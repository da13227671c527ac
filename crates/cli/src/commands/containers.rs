//! `expose containers`: one row per target

use anyhow::Result;
use expose_lib::ContainerInfo;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, print_json, print_table, OutputFormat};

/// Row for the containers table
#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Uptime")]
    uptime: String,
    #[tabled(rename = "Clients")]
    clients: String,
    #[tabled(rename = "Restarts")]
    restarts: String,
}

impl From<&ContainerInfo> for ContainerRow {
    fn from(info: &ContainerInfo) -> Self {
        Self {
            name: info.name.clone(),
            id: info.id.clone(),
            status: color_status(info.status.as_str()),
            cpu: format!("{:.1}%", info.cpu_percent),
            memory: format!("{:.1} MB", info.memory_mb),
            uptime: info.uptime.clone(),
            // Metrics endpoint unreachable this cycle
            clients: info
                .app_metrics
                .as_ref()
                .map(|m| format!("{} (+{})", m.connected_clients, m.connecting_clients))
                .unwrap_or_else(|| "-".to_string()),
            restarts: info
                .health
                .as_ref()
                .map(|h| h.restart_count.to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Keep targets whose status matches `status`, case-insensitively
fn filter_by_status<'a>(
    containers: &'a [ContainerInfo],
    status: Option<&str>,
) -> Vec<&'a ContainerInfo> {
    containers
        .iter()
        .filter(|c| status.map_or(true, |s| c.status.as_str().eq_ignore_ascii_case(s)))
        .collect()
}

/// List targets
pub async fn list_containers(
    client: &ApiClient,
    status: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let snapshot = client.status().await?;
    let containers = filter_by_status(&snapshot.containers, status.as_deref());

    match format {
        OutputFormat::Json => print_json(&containers),
        OutputFormat::Table => {
            let rows: Vec<ContainerRow> = containers.into_iter().map(ContainerRow::from).collect();
            print_table(&rows, "No containers found");
            Ok(())
        }
    }
}
