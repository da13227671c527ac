//! Rolling session aggregation across collection cycles
//!
//! Two transition sources feed the tracker: the self-measured update run
//! every cycle, and an optional authoritative override from the manager's
//! peak file. A target whose cumulative traffic counter drops has restarted,
//! which starts a new session.
//!
//! Cycles may finish out of order. Every transition carries its cycle
//! number and the tracker ignores anything older than the newest cycle it
//! has already applied.

use crate::models::SessionInfo;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

/// Inner state, always accessed under the tracker lock
#[derive(Debug, Clone)]
struct SessionState {
    start_time: DateTime<Utc>,
    peak_connections: i64,
    sample_count: i64,
    connection_sum: i64,
    /// Last `(upload, download)` seen per target id
    traffic: HashMap<String, (f64, f64)>,
    /// Newest cycle applied so far
    cycle: u64,
}

/// Cumulative counters of one target in one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct TargetTraffic {
    pub id: String,
    /// `None` when the target's metrics were unavailable this cycle
    pub counters: Option<(f64, f64)>,
}

impl TargetTraffic {
    pub fn reported(id: impl Into<String>, upload: f64, download: f64) -> Self {
        Self {
            id: id.into(),
            counters: Some((upload, download)),
        }
    }

    pub fn silent(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            counters: None,
        }
    }
}

/// One self-measured sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSample {
    pub connected: i64,
    /// Every target discovered this cycle
    pub traffic: Vec<TargetTraffic>,
    /// Uptime reported by the monitored process itself
    pub uptime_seconds: Option<f64>,
}

/// Outcome of a self update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionUpdate {
    Recorded,
    /// A target's counter dropped and a new session started
    Reset,
    /// A newer cycle was already applied; nothing changed
    Stale,
}

/// Thread-safe session tracker
#[derive(Debug)]
pub struct SessionTracker {
    state: Mutex<SessionState>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTracker {
    /// Start a session now
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(start_time: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(SessionState {
                start_time,
                peak_connections: 0,
                sample_count: 0,
                connection_sum: 0,
                traffic: HashMap::new(),
                cycle: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        // A panic while holding the lock cannot leave the counters inconsistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the sample of `cycle`
    pub fn update(&self, cycle: u64, sample: SessionSample) -> SessionUpdate {
        self.update_at(cycle, sample, Utc::now())
    }

    pub fn update_at(
        &self,
        cycle: u64,
        sample: SessionSample,
        now: DateTime<Utc>,
    ) -> SessionUpdate {
        let mut state = self.lock();
        if cycle < state.cycle {
            debug!(
                cycle = cycle,
                latest_cycle = state.cycle,
                "Ignoring session sample from an older cycle"
            );
            return SessionUpdate::Stale;
        }
        state.cycle = cycle;

        // Only targets that reported in both cycles can show a regression
        let regressed = sample.traffic.iter().find(|t| {
            match (t.counters, state.traffic.get(&t.id)) {
                (Some((up, down)), Some(&(prev_up, prev_down))) => {
                    up < prev_up || down < prev_down
                }
                _ => false,
            }
        });
        let reset = regressed.is_some();
        if let Some(target) = regressed {
            info!(
                event = "session_reset",
                target_id = %target.id,
                "Cumulative traffic decreased, starting new session"
            );
            state.start_time = now;
            state.peak_connections = 0;
            state.sample_count = 0;
            state.connection_sum = 0;
        }

        // Silent targets keep their last counters; vanished ones are forgotten
        let mut traffic = HashMap::with_capacity(sample.traffic.len());
        for target in sample.traffic {
            let counters = target
                .counters
                .or_else(|| state.traffic.get(&target.id).copied());
            if let Some(counters) = counters {
                traffic.insert(target.id, counters);
            }
        }
        state.traffic = traffic;

        state.peak_connections = state.peak_connections.max(sample.connected);
        state.sample_count += 1;
        state.connection_sum += sample.connected;

        if let Some(uptime) = sample.uptime_seconds.filter(|u| *u > 0.0) {
            state.start_time = now - Duration::milliseconds((uptime * 1000.0) as i64);
        }

        if reset {
            SessionUpdate::Reset
        } else {
            SessionUpdate::Recorded
        }
    }

    /// Apply the manager's peak and start time; never lowers the peak
    pub fn apply_override(&self, cycle: u64, peak: i64, start_time: Option<DateTime<Utc>>) {
        let mut state = self.lock();
        if cycle < state.cycle {
            return;
        }
        state.cycle = cycle;
        if peak > state.peak_connections {
            state.peak_connections = peak;
        }
        if let Some(start) = start_time.filter(|t| t.timestamp() != 0) {
            state.start_time = start;
        }
    }

    /// Read-only copy of the current session
    pub fn snapshot(&self) -> SessionInfo {
        let state = self.lock();
        let avg_connections = if state.sample_count > 0 {
            state.connection_sum as f64 / state.sample_count as f64
        } else {
            0.0
        };
        let (total_upload_bytes, total_download_bytes) = state
            .traffic
            .values()
            .fold((0.0_f64, 0.0_f64), |(up, down), &(u, d)| (up + u, down + d));

        SessionInfo {
            start_time: state.start_time.timestamp(),
            peak_connections: state.peak_connections,
            avg_connections,
            total_upload_bytes,
            total_download_bytes,
        }
    }
}
