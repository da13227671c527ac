//! Merging per-target results into one snapshot
//!
//! Rules:
//! - connection totals and state buckets sum across targets
//! - unique IP counts also sum; targets live in separate network namespaces,
//!   so this is an upper bound when two targets share one
//! - country lists merge by summing per country, then sort descending
//! - numeric settings take the maximum, booleans are OR-ed
//! - country breakdowns come from exactly one source per snapshot: the
//!   manager's capture window rescaled to the connected-client total when it
//!   is available, the self-observed connection tables otherwise

use crate::manager::{ManagerData, ManagerSettings, TrackerSnapshot};
use crate::models::{
    ConnectionStats, ContainerInfo, ContainerSettings, CountryStats, SnowflakeMetrics,
    StatusResponse, SystemMetrics,
};
use crate::parsers::ConnectionSummary;
use crate::state::{SessionSample, SessionTracker, TargetTraffic};
use std::collections::BTreeMap;

/// Stable sort, highest count first
pub fn sort_countries(countries: &mut [CountryStats]) {
    countries.sort_by(|a, b| b.connections.cmp(&a.connections));
}

/// Sum connection stats; `None` when the merged result counts nothing
pub fn merge_connection_stats<'a>(
    stats: impl IntoIterator<Item = &'a ConnectionStats>,
) -> Option<ConnectionStats> {
    let mut merged = ConnectionStats::default();
    for s in stats {
        merged.total += s.total;
        merged.unique_ips += s.unique_ips;
        for (state, count) in &s.states {
            *merged.states.entry(state.clone()).or_insert(0) += count;
        }
    }

    if merged.is_empty() {
        None
    } else {
        Some(merged)
    }
}

/// Sum country counts from several lists
pub fn merge_country_stats<'a>(
    lists: impl IntoIterator<Item = &'a [CountryStats]>,
) -> Vec<CountryStats> {
    let mut by_country: BTreeMap<&str, u64> = BTreeMap::new();
    for list in lists {
        for entry in list {
            *by_country.entry(entry.country.as_str()).or_insert(0) += entry.connections;
        }
    }

    let mut merged: Vec<CountryStats> = by_country
        .into_iter()
        .map(|(country, connections)| CountryStats {
            country: country.to_string(),
            connections,
        })
        .collect();
    sort_countries(&mut merged);
    merged
}

/// Max of numeric settings, OR of booleans; `None` for an empty input
pub fn merge_settings<'a>(
    settings: impl IntoIterator<Item = &'a ContainerSettings>,
) -> Option<ContainerSettings> {
    settings.into_iter().fold(None, |acc, s| {
        Some(match acc {
            None => s.clone(),
            Some(acc) => ContainerSettings {
                max_clients: acc.max_clients.max(s.max_clients),
                bandwidth_limit_mbps: acc.bandwidth_limit_mbps.max(s.bandwidth_limit_mbps),
                auto_start: acc.auto_start || s.auto_start,
            },
        })
    })
}

impl From<&ManagerSettings> for ContainerSettings {
    fn from(settings: &ManagerSettings) -> Self {
        Self {
            max_clients: settings.max_clients,
            bandwidth_limit_mbps: settings.bandwidth_mbps,
            auto_start: false,
        }
    }
}

/// Rescale the manager's per-country IP counts to the connected-client total
///
/// Each share is `round(raw × connected / total_ips)`. Rounding can leave the
/// sum off by a few; the difference is settled one unit at a time on the
/// entries whose rounding moved them furthest, so the result always sums to
/// `connected`. Countries estimated at zero are dropped.
pub fn scale_countries(snapshot: &TrackerSnapshot, connected: u64) -> Vec<CountryStats> {
    if snapshot.total_ips == 0 || connected == 0 {
        return Vec::new();
    }

    let factor = connected as f64 / snapshot.total_ips as f64;
    let mut shares: Vec<(usize, u64, f64)> = snapshot
        .countries
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let exact = c.connections as f64 * factor;
            let rounded = exact.round();
            (i, rounded as u64, exact - rounded)
        })
        .collect();

    let assigned: u64 = shares.iter().map(|(_, n, _)| n).sum();
    if assigned < connected {
        // Largest shortfall first
        shares.sort_by(|a, b| b.2.total_cmp(&a.2));
        for share in shares.iter_mut().take((connected - assigned) as usize) {
            share.1 += 1;
        }
    } else if assigned > connected {
        // Most rounded-up first
        shares.sort_by(|a, b| a.2.total_cmp(&b.2));
        let mut excess = assigned - connected;
        for share in shares.iter_mut() {
            if excess == 0 {
                break;
            }
            if share.1 > 0 {
                share.1 -= 1;
                excess -= 1;
            }
        }
    }
    shares.sort_by_key(|(i, _, _)| *i);

    let mut scaled: Vec<CountryStats> = shares
        .into_iter()
        .filter(|(_, n, _)| *n > 0)
        .map(|(i, n, _)| CountryStats {
            country: snapshot.countries[i].country.clone(),
            connections: n,
        })
        .collect();
    sort_countries(&mut scaled);
    scaled
}

/// One target's result for the cycle
#[derive(Debug, Clone)]
pub struct TargetSample {
    pub info: ContainerInfo,
    /// `None` when the connection table could not be read
    pub connections: Option<ConnectionSummary>,
}

impl TargetSample {
    pub fn new(info: ContainerInfo) -> Self {
        Self {
            info,
            connections: None,
        }
    }
}

/// Everything one cycle gathered, in discovery order
#[derive(Debug, Clone)]
pub struct CycleResults {
    /// Orders cycles that finish out of order
    pub cycle: u64,
    pub server_id: String,
    pub timestamp: i64,
    pub targets: Vec<TargetSample>,
    pub system: Option<SystemMetrics>,
    pub manager: ManagerData,
    pub snowflake: Option<SnowflakeMetrics>,
}

/// Merge a cycle's results and advance the session
pub fn build_snapshot(results: CycleResults, session: &SessionTracker) -> StatusResponse {
    let CycleResults {
        cycle,
        server_id,
        timestamp,
        targets,
        system,
        manager,
        snowflake,
    } = results;

    let mut connected_clients = 0i64;
    let mut connecting_clients = 0i64;
    let mut max_uptime: Option<f64> = None;
    let mut reporting = 0usize;
    let mut traffic = Vec::with_capacity(targets.len());

    for target in &targets {
        let Some(app) = target.info.app_metrics.as_ref() else {
            traffic.push(TargetTraffic::silent(target.info.id.clone()));
            continue;
        };
        reporting += 1;
        connected_clients += app.connected_clients;
        connecting_clients += app.connecting_clients;
        traffic.push(TargetTraffic::reported(
            target.info.id.clone(),
            app.bytes_uploaded,
            app.bytes_downloaded,
        ));
        if app.uptime_seconds > 0.0 {
            max_uptime = Some(max_uptime.map_or(app.uptime_seconds, |u| u.max(app.uptime_seconds)));
        }
    }

    // A cycle with no reachable metrics says nothing about the session
    if reporting > 0 {
        session.update(
            cycle,
            SessionSample {
                connected: connected_clients,
                traffic,
                uptime_seconds: max_uptime,
            },
        );
    }
    if let Some(peak) = &manager.peak {
        session.apply_override(cycle, peak.peak, peak.start_time);
    }

    let summaries: Vec<&ConnectionSummary> =
        targets.iter().filter_map(|t| t.connections.as_ref()).collect();
    let connections = merge_connection_stats(summaries.iter().map(|s| &s.stats));

    let clients_by_country =
        if manager.available && !manager.snapshot.is_empty() && connected_clients > 0 {
            scale_countries(&manager.snapshot, connected_clients as u64)
        } else {
            merge_country_stats(summaries.iter().map(|s| s.countries.as_slice()))
        };

    let settings = merge_settings(targets.iter().filter_map(|t| t.info.settings.as_ref()))
        .or_else(|| manager.settings.as_ref().map(ContainerSettings::from));

    StatusResponse {
        server_id,
        timestamp,
        total_containers: targets.len(),
        connected_clients,
        connecting_clients,
        manager_available: manager.available,
        system,
        settings,
        session: Some(session.snapshot()),
        connections,
        clients_by_country,
        traffic_by_country: manager.traffic,
        snowflake,
        containers: targets.into_iter().map(|t| t.info).collect(),
    }
}
