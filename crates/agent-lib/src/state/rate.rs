//! Delta and rate computation over cumulative host counters
//!
//! Each counter family keeps exactly one previous sample. The first sample of a
//! family yields zero rates; later samples are compared against the previous one.

use std::time::Instant;

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Cumulative CPU tick counters from the aggregate `cpu` line of `/proc/stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSample {
    pub idle: u64,
    pub total: u64,
}

/// Previous CPU sample
#[derive(Debug, Default)]
pub struct CpuRateState {
    prev: Option<CpuSample>,
}

impl CpuRateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Percent busy since the previous sample: `(1 - Δidle/Δtotal) × 100`
    pub fn update(&mut self, current: CpuSample) -> f64 {
        let percent = match self.prev {
            Some(prev) => {
                let total_delta = current.total.saturating_sub(prev.total) as f64;
                let idle_delta = current.idle.saturating_sub(prev.idle) as f64;
                if total_delta > 0.0 {
                    round2((1.0 - idle_delta / total_delta) * 100.0)
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.prev = Some(current);
        percent
    }
}

/// Summed counters across all non-loopback interfaces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetSample {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
}

impl NetSample {
    /// Fold one interface's counters into the running sum
    pub fn add(&mut self, other: &NetSample) {
        self.rx_bytes += other.rx_bytes;
        self.tx_bytes += other.tx_bytes;
        self.rx_errors += other.rx_errors;
        self.tx_errors += other.tx_errors;
        self.rx_dropped += other.rx_dropped;
        self.tx_dropped += other.tx_dropped;
    }
}

/// Rates derived from two network samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetRates {
    pub in_mbps: f64,
    pub out_mbps: f64,
    /// Plain counter difference, not divided by time
    pub errors: u64,
    /// Plain counter difference, not divided by time
    pub drops: u64,
}

/// Previous network sample and the instant it was taken
#[derive(Debug, Default)]
pub struct NetRateState {
    prev: Option<(NetSample, Instant)>,
}

impl NetRateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rates since the previous sample, taken at `now`
    pub fn update(&mut self, current: NetSample, now: Instant) -> NetRates {
        let rates = match self.prev {
            // Older than the stored sample; keep the newer one
            Some((_, taken_at)) if now < taken_at => return NetRates::default(),
            Some((prev, taken_at)) => {
                Self::rates(&prev, &current, now.duration_since(taken_at).as_secs_f64())
            }
            None => NetRates::default(),
        };
        self.prev = Some((current, now));
        rates
    }

    /// `Δbytes × 8 / (elapsed × 1e6)`, zero when no time has elapsed
    pub fn rates(prev: &NetSample, current: &NetSample, elapsed_secs: f64) -> NetRates {
        if elapsed_secs <= 0.0 {
            return NetRates::default();
        }
        let mbps = |delta: u64| round2(delta as f64 * 8.0 / (elapsed_secs * 1e6));

        NetRates {
            in_mbps: mbps(current.rx_bytes.saturating_sub(prev.rx_bytes)),
            out_mbps: mbps(current.tx_bytes.saturating_sub(prev.tx_bytes)),
            errors: current.rx_errors.saturating_sub(prev.rx_errors)
                + current.tx_errors.saturating_sub(prev.tx_errors),
            drops: current.rx_dropped.saturating_sub(prev.rx_dropped)
                + current.tx_dropped.saturating_sub(prev.tx_dropped),
        }
    }
}

/// All cross-cycle host counter state
#[derive(Debug, Default)]
pub struct RateState {
    pub cpu: CpuRateState,
    pub net: NetRateState,
    /// Newest cycle whose readings were applied
    cycle: u64,
}

impl RateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `cycle` for the next update; false when a newer cycle already advanced the state
    pub fn advance(&mut self, cycle: u64) -> bool {
        if cycle < self.cycle {
            return false;
        }
        self.cycle = cycle;
        true
    }
}
