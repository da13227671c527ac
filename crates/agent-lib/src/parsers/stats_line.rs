//! `[STATS]` log line parsing
//!
//! Targets periodically log a line such as
//! `[STATS] Connecting: 2 | Connected: 14 | Up: 1.5 GB | Down: 320.4 MB | Uptime: 2h5m10s`.
//! When the metrics endpoint is unreachable the most recent such line can
//! stand in for it.

use crate::models::AppMetrics;

pub const STATS_MARKER: &str = "[STATS]";

/// Find the last stats line in a batch of log lines
pub fn last_stats_line<'a, I>(lines: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    lines.into_iter().filter(|l| l.contains(STATS_MARKER)).last()
}

/// Parse one stats line; `None` when no recognized field is present
pub fn parse_stats_line(line: &str) -> Option<AppMetrics> {
    let (_, body) = line.split_once(STATS_MARKER)?;
    let mut metrics = AppMetrics::default();
    let mut found = false;

    for part in body.split('|') {
        let Some((key, value)) = part.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Connecting" => {
                if let Ok(v) = value.parse() {
                    metrics.connecting_clients = v;
                    found = true;
                }
            }
            "Connected" => {
                if let Ok(v) = value.parse() {
                    metrics.connected_clients = v;
                    found = true;
                }
            }
            "Up" => {
                if let Some(v) = parse_size(value) {
                    metrics.bytes_uploaded = v;
                    found = true;
                }
            }
            "Down" => {
                if let Some(v) = parse_size(value) {
                    metrics.bytes_downloaded = v;
                    found = true;
                }
            }
            "Uptime" => {
                if let Some(v) = parse_duration(value) {
                    metrics.uptime_seconds = v;
                    found = true;
                }
            }
            _ => {}
        }
    }

    if found {
        // A target that logs stats is serving
        metrics.is_live = true;
        Some(metrics)
    } else {
        None
    }
}

/// Parse a human-readable size like `1.5 GB` or `512B` into bytes (1024-based)
pub fn parse_size(s: &str) -> Option<f64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: f64 = number.parse().ok()?;
    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1.0,
        "KB" | "KIB" => 1024.0,
        "MB" | "MIB" => 1024.0 * 1024.0,
        "GB" | "GIB" => 1024.0 * 1024.0 * 1024.0,
        "TB" | "TIB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some(number * multiplier)
}

/// Parse a compact duration like `2h5m10s`, `45s` or `1.5s` into seconds
pub fn parse_duration(s: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut number = String::new();
    let mut any = false;

    for c in s.trim().chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let value: f64 = number.parse().ok()?;
        number.clear();
        total += match c {
            'h' => value * 3600.0,
            'm' => value * 60.0,
            's' => value,
            _ => return None,
        };
        any = true;
    }

    if !number.is_empty() || !any {
        return None;
    }
    Some(total)
}

/// Format whole seconds the way the snapshot reports uptime
///
/// `0s`, `45s`, `3m7s`, `2h0m5s`.
pub fn format_uptime(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}
