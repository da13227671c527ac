//! Reader for the cooperating manager's flat state files
//!
//! Layout under the manager directory:
//! - `settings.conf` - bash-style `KEY=VALUE` lines
//! - `traffic_stats/tracker_snapshot` - `DIR|COUNTRY|BYTES|IP` for the current capture window
//! - `traffic_stats/cumulative_data` - `COUNTRY|FROM_BYTES|TO_BYTES`
//! - `traffic_stats/peak_connections` - start timestamp, then peak integer
//!
//! The manager rewrites these files while we read them, so a final line
//! without a trailing newline is treated as a partial write and dropped.
//! Any individual file may be missing; only a missing directory marks the
//! whole source unavailable.

use crate::models::{CountryStats, CountryTraffic};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Settings recognized in `settings.conf`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerSettings {
    pub max_clients: i64,
    pub bandwidth_mbps: f64,
    pub container_count: i64,
    pub snowflake_enabled: bool,
    pub snowflake_count: i64,
}

/// Unique client IPs per country in the manager's latest capture window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerSnapshot {
    /// Sorted descending by count
    pub countries: Vec<CountryStats>,
    /// Sum of the per-country unique IP counts
    pub total_ips: u64,
}

impl TrackerSnapshot {
    pub fn is_empty(&self) -> bool {
        self.total_ips == 0
    }
}

/// Contents of `peak_connections`
#[derive(Debug, Clone, PartialEq)]
pub struct PeakRecord {
    /// `None` when the first line is neither RFC 3339 nor Unix seconds
    pub start_time: Option<DateTime<Utc>>,
    pub peak: i64,
}

/// Everything read from the manager in one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerData {
    pub available: bool,
    pub snapshot: TrackerSnapshot,
    pub traffic: Vec<CountryTraffic>,
    pub peak: Option<PeakRecord>,
    pub settings: Option<ManagerSettings>,
}

/// Reads the manager directory
#[derive(Debug, Clone)]
pub struct ManagerReader {
    base: PathBuf,
}

impl ManagerReader {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn stats_path(&self, name: &str) -> PathBuf {
        self.base.join("traffic_stats").join(name)
    }

    /// Read every manager file
    pub async fn read(&self) -> ManagerData {
        if fs::metadata(&self.base).await.is_err() {
            debug!(path = %self.base.display(), "Manager directory not present");
            return ManagerData::default();
        }

        let snapshot = read_lines(&self.stats_path("tracker_snapshot"))
            .await
            .map(|content| parse_tracker_snapshot(&content))
            .unwrap_or_default();
        let traffic = read_lines(&self.stats_path("cumulative_data"))
            .await
            .map(|content| parse_cumulative_data(&content))
            .unwrap_or_default();
        let peak = read_lines(&self.stats_path("peak_connections"))
            .await
            .and_then(|content| parse_peak_connections(&content));

        let settings_path = self.base.join("settings.conf");
        let settings = read_lines(&settings_path)
            .await
            .and_then(|content| parse_settings(&content));
        if settings.is_none() {
            debug!(path = %settings_path.display(), "No recognized manager settings");
        }

        ManagerData {
            available: true,
            snapshot,
            traffic,
            peak,
            settings,
        }
    }
}

async fn read_lines(path: &Path) -> Option<String> {
    match fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read manager file");
            None
        }
    }
}

/// Complete lines of `content`; an unterminated last line is dropped
pub fn safe_read_lines(content: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = content.split('\n').collect();
    // Either the empty remainder after a final newline or a partial write
    lines.pop();
    lines
}

/// Parse `DIR|COUNTRY|BYTES|IP` lines into unique IPs per country
pub fn parse_tracker_snapshot(content: &str) -> TrackerSnapshot {
    let mut by_country: HashMap<&str, HashSet<&str>> = HashMap::new();

    for line in safe_read_lines(content) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < 4 {
            continue;
        }
        let country = parts[1].trim();
        let ip = parts[3].trim();
        if country.is_empty() || ip.is_empty() {
            continue;
        }
        by_country.entry(country).or_default().insert(ip);
    }

    let mut countries: Vec<CountryStats> = by_country
        .into_iter()
        .map(|(country, ips)| CountryStats {
            country: country.to_string(),
            connections: ips.len() as u64,
        })
        .collect();
    // Deterministic order before the stable count sort
    countries.sort_by(|a, b| a.country.cmp(&b.country));
    crate::aggregate::sort_countries(&mut countries);

    let total_ips = countries.iter().map(|c| c.connections).sum();
    TrackerSnapshot {
        countries,
        total_ips,
    }
}

/// Parse `COUNTRY|FROM_BYTES|TO_BYTES` lines, summing duplicate countries
pub fn parse_cumulative_data(content: &str) -> Vec<CountryTraffic> {
    let mut by_country: BTreeMap<&str, (f64, f64)> = BTreeMap::new();

    for line in safe_read_lines(content) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, '|');
        let (Some(country), Some(from), Some(to)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let country = country.trim();
        if country.is_empty() {
            continue;
        }
        let (Ok(from), Ok(to)) = (from.trim().parse::<f64>(), to.trim().parse::<f64>()) else {
            continue;
        };

        let entry = by_country.entry(country).or_insert((0.0, 0.0));
        entry.0 += from;
        entry.1 += to;
    }

    let mut traffic: Vec<CountryTraffic> = by_country
        .into_iter()
        .map(|(country, (from_bytes, to_bytes))| CountryTraffic {
            country: country.to_string(),
            from_bytes,
            to_bytes,
        })
        .collect();
    traffic.sort_by(|a, b| {
        (b.from_bytes + b.to_bytes).total_cmp(&(a.from_bytes + a.to_bytes))
    });
    traffic
}

/// Parse the two-line peak record; `None` unless both lines are present
pub fn parse_peak_connections(content: &str) -> Option<PeakRecord> {
    let lines = safe_read_lines(content);
    if lines.len() < 2 {
        return None;
    }

    let start_line = lines[0].trim();
    let start_time = DateTime::parse_from_rfc3339(start_line)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            start_line
                .parse::<i64>()
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        });
    let peak = lines[1].trim().parse::<i64>().unwrap_or(0);

    Some(PeakRecord { start_time, peak })
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
}

/// Parse `settings.conf`; `None` when no key is recognized
pub fn parse_settings(content: &str) -> Option<ManagerSettings> {
    let mut settings = ManagerSettings::default();
    let mut found = false;

    for line in safe_read_lines(content) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(value.trim());

        match key.trim() {
            "MAX_CLIENTS" => {
                if let Ok(v) = value.parse() {
                    settings.max_clients = v;
                    found = true;
                }
            }
            "BANDWIDTH" => {
                if let Ok(v) = value.parse() {
                    settings.bandwidth_mbps = v;
                    found = true;
                }
            }
            "CONTAINER_COUNT" => {
                if let Ok(v) = value.parse() {
                    settings.container_count = v;
                    found = true;
                }
            }
            "SNOWFLAKE_ENABLED" => {
                settings.snowflake_enabled = value.eq_ignore_ascii_case("true");
                found = true;
            }
            "SNOWFLAKE_COUNT" => {
                if let Ok(v) = value.parse() {
                    settings.snowflake_count = v;
                    found = true;
                }
            }
            _ => {}
        }
    }

    found.then_some(settings)
}
