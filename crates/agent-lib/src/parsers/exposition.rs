//! Minimal parser for the Prometheus text exposition format
//!
//! Only a fixed vocabulary is recognized; every other metric is ignored.
//! This is not a general-purpose client.

use crate::models::{AppMetrics, ContainerSettings, SnowflakeMetrics};

/// One sample line of exposition text
#[derive(Debug, Clone, PartialEq)]
pub enum ExpositionLine<'a> {
    /// `name value [timestamp]`
    Bare { name: &'a str, value: f64 },
    /// `name{labels} value [timestamp]`
    Labeled {
        name: &'a str,
        labels: &'a str,
        value: f64,
    },
}

impl<'a> ExpositionLine<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            ExpositionLine::Bare { name, .. } | ExpositionLine::Labeled { name, .. } => name,
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            ExpositionLine::Bare { value, .. } | ExpositionLine::Labeled { value, .. } => *value,
        }
    }
}

/// Split one line into name and value
///
/// Returns `None` for blank lines, comments and lines whose value does not parse.
pub fn parse_line(line: &str) -> Option<ExpositionLine<'_>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(open) = line.find('{') {
        let name = &line[..open];
        let rest = &line[open..];
        let close = rest.find('}')?;
        let labels = &rest[1..close];
        let value = first_token(&rest[close + 1..])?;
        return Some(ExpositionLine::Labeled {
            name,
            labels,
            value,
        });
    }

    let (name, rest) = line.split_once(' ')?;
    Some(ExpositionLine::Bare {
        name,
        value: first_token(rest)?,
    })
}

/// Value is the first token; an optional trailing timestamp is ignored
fn first_token(s: &str) -> Option<f64> {
    s.split_whitespace().next()?.parse().ok()
}

/// How repeated samples of one metric combine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Last sample wins
    Gauge,
    /// All samples (any labels) are added together
    Sum,
}

/// Fields that can be filled from a known metric name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricField {
    ConnectedClients,
    ConnectingClients,
    Announcing,
    IsLive,
    BytesUploaded,
    BytesDownloaded,
    UptimeSeconds,
    IdleSeconds,
    MaxClients,
    BandwidthLimitBytesPerSecond,
    SnowflakeConnections,
    SnowflakeTimeouts,
    SnowflakeInboundBytes,
    SnowflakeOutboundBytes,
}

/// Recognized metric names
pub const METRIC_TABLE: &[(&str, MetricField, Aggregation)] = &[
    ("conduit_connected_clients", MetricField::ConnectedClients, Aggregation::Gauge),
    ("conduit_connecting_clients", MetricField::ConnectingClients, Aggregation::Gauge),
    ("conduit_announcing", MetricField::Announcing, Aggregation::Gauge),
    ("conduit_is_live", MetricField::IsLive, Aggregation::Gauge),
    ("conduit_bytes_uploaded", MetricField::BytesUploaded, Aggregation::Gauge),
    ("conduit_bytes_downloaded", MetricField::BytesDownloaded, Aggregation::Gauge),
    ("conduit_uptime_seconds", MetricField::UptimeSeconds, Aggregation::Gauge),
    ("conduit_idle_seconds", MetricField::IdleSeconds, Aggregation::Gauge),
    ("conduit_max_clients", MetricField::MaxClients, Aggregation::Gauge),
    (
        "conduit_bandwidth_limit_bytes_per_second",
        MetricField::BandwidthLimitBytesPerSecond,
        Aggregation::Gauge,
    ),
    (
        "tor_snowflake_proxy_connections_total",
        MetricField::SnowflakeConnections,
        Aggregation::Sum,
    ),
    (
        "tor_snowflake_proxy_connection_timeouts_total",
        MetricField::SnowflakeTimeouts,
        Aggregation::Sum,
    ),
    (
        "tor_snowflake_proxy_traffic_inbound_bytes_total",
        MetricField::SnowflakeInboundBytes,
        Aggregation::Sum,
    ),
    (
        "tor_snowflake_proxy_traffic_outbound_bytes_total",
        MetricField::SnowflakeOutboundBytes,
        Aggregation::Sum,
    ),
];

fn lookup(name: &str) -> Option<(MetricField, Aggregation)> {
    METRIC_TABLE
        .iter()
        .find(|(known, _, _)| *known == name)
        .map(|(_, field, agg)| (*field, *agg))
}

/// Values for every recognized field present in a document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMetrics {
    values: Vec<(MetricField, f64)>,
}

impl ParsedMetrics {
    pub fn get(&self, field: MetricField) -> Option<f64> {
        self.values
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| *v)
    }

    fn record(&mut self, field: MetricField, aggregation: Aggregation, value: f64) {
        match self.values.iter_mut().find(|(f, _)| *f == field) {
            Some((_, current)) => match aggregation {
                Aggregation::Gauge => *current = value,
                Aggregation::Sum => *current += value,
            },
            None => self.values.push((field, value)),
        }
    }

    /// True when no recognized metric was found
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Application metrics; absent fields stay at zero
    pub fn app_metrics(&self) -> AppMetrics {
        let get = |field| self.get(field).unwrap_or(0.0);
        AppMetrics {
            connected_clients: get(MetricField::ConnectedClients) as i64,
            connecting_clients: get(MetricField::ConnectingClients) as i64,
            announcing: get(MetricField::Announcing) as i64,
            is_live: get(MetricField::IsLive) >= 1.0,
            bytes_uploaded: get(MetricField::BytesUploaded),
            bytes_downloaded: get(MetricField::BytesDownloaded),
            uptime_seconds: get(MetricField::UptimeSeconds),
            idle_seconds: get(MetricField::IdleSeconds),
        }
    }

    /// Settings gauges; the bandwidth limit is converted to Mbps
    pub fn settings(&self, auto_start: bool) -> ContainerSettings {
        ContainerSettings {
            max_clients: self.get(MetricField::MaxClients).unwrap_or(0.0) as i64,
            bandwidth_limit_mbps: self
                .get(MetricField::BandwidthLimitBytesPerSecond)
                .map(|bps| bps * 8.0 / 1_000_000.0)
                .unwrap_or(0.0),
            auto_start,
        }
    }

    pub fn snowflake(&self) -> SnowflakeMetrics {
        let get = |field| self.get(field).unwrap_or(0.0);
        SnowflakeMetrics {
            total_connections: get(MetricField::SnowflakeConnections) as i64,
            timeouts_total: get(MetricField::SnowflakeTimeouts) as i64,
            inbound_bytes: get(MetricField::SnowflakeInboundBytes),
            outbound_bytes: get(MetricField::SnowflakeOutboundBytes),
        }
    }
}

/// Parse a whole exposition document
pub fn parse_metrics(body: &str) -> ParsedMetrics {
    let mut parsed = ParsedMetrics::default();
    for line in body.lines().filter_map(parse_line) {
        if let Some((field, aggregation)) = lookup(line.name()) {
            parsed.record(field, aggregation, line.value());
        }
    }
    parsed
}
