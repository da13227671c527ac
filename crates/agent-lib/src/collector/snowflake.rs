//! Snowflake proxy fleet
//!
//! The manager can run a fleet of Snowflake proxies next to the Conduit
//! targets. Each proxy listens on loopback at a port counting down from a
//! base port and exposes its counters in the exposition format.

use super::bounded;
use super::target::fetch_metrics;
use crate::manager::ManagerSettings;
use crate::models::SnowflakeMetrics;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SNOWFLAKE_METRICS_PATH: &str = "/internal/metrics";

/// Port of the `index`-th proxy (1-based)
fn proxy_port(base_port: u16, index: u16) -> Option<u16> {
    base_port.checked_add(1)?.checked_sub(index)
}

/// Scrape every proxy and sum their counters
///
/// Returns `None` when the fleet is disabled or no proxy answered.
pub async fn collect_snowflake(
    client: &reqwest::Client,
    settings: Option<&ManagerSettings>,
    base_port: u16,
    token: &CancellationToken,
    timeout: Duration,
) -> Option<SnowflakeMetrics> {
    let settings = settings.filter(|s| s.snowflake_enabled)?;
    let count = u16::try_from(settings.snowflake_count.max(1)).unwrap_or(u16::MAX);

    let mut total = SnowflakeMetrics::default();
    let mut answered = 0;

    for index in 1..=count {
        let Some(port) = proxy_port(base_port, index) else {
            break;
        };
        let url = format!("http://127.0.0.1:{}{}", port, SNOWFLAKE_METRICS_PATH);

        match bounded(token, timeout, "snowflake", fetch_metrics(client, &url)).await {
            Ok(parsed) => {
                let proxy = parsed.snowflake();
                total.total_connections += proxy.total_connections;
                total.timeouts_total += proxy.timeouts_total;
                total.inbound_bytes += proxy.inbound_bytes;
                total.outbound_bytes += proxy.outbound_bytes;
                answered += 1;
            }
            Err(e) => {
                warn!(port = port, error = %e, "Failed to scrape snowflake proxy");
            }
        }
    }

    debug!(proxies = count, answered = answered, "Snowflake scrape complete");
    (answered > 0).then_some(total)
}
