//! Host-wide resource readings
//!
//! Reads the host's `/proc` (mounted into the agent's container) and the
//! host root filesystem. Counters are turned into rates against the
//! loop-owned [`RateState`], so reading and rate computation are separate
//! steps and the state lock is never held across I/O.

use crate::models::SystemMetrics;
use crate::state::{round2, CpuSample, NetSample, RateState};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tracing::{debug, warn};

/// Raw host values from one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostReadings {
    pub cpu: Option<CpuSample>,
    /// `(total_mb, used_mb)`
    pub memory: Option<(f64, f64)>,
    pub load: Option<[f64; 3]>,
    pub net: Option<NetSample>,
    /// `(total_gb, used_gb)`
    pub disk: Option<(f64, f64)>,
    /// When the counter files were read
    pub read_at: Option<Instant>,
}

impl HostReadings {
    /// Turn readings into metrics, advancing the rate state
    ///
    /// Readings from a cycle older than the last applied one still report
    /// their gauges, but leave the rates at zero and the state untouched.
    pub fn into_metrics(self, rates: &mut RateState, cycle: u64) -> SystemMetrics {
        let mut metrics = SystemMetrics::default();
        let fresh = rates.advance(cycle);
        if !fresh {
            debug!(cycle = cycle, "Skipping rates for host readings from an older cycle");
        }
        let read_at = self.read_at.unwrap_or_else(Instant::now);

        if let Some(cpu) = self.cpu.filter(|_| fresh) {
            metrics.cpu_percent = rates.cpu.update(cpu);
        }
        if let Some((total, used)) = self.memory {
            metrics.memory_total_mb = total;
            metrics.memory_used_mb = used;
        }
        if let Some([one, five, fifteen]) = self.load {
            metrics.load_avg_1m = one;
            metrics.load_avg_5m = five;
            metrics.load_avg_15m = fifteen;
        }
        if let Some((total, used)) = self.disk {
            metrics.disk_total_gb = total;
            metrics.disk_used_gb = used;
        }
        if let Some(net) = self.net.filter(|_| fresh) {
            let net = rates.net.update(net, read_at);
            metrics.net_in_mbps = net.in_mbps;
            metrics.net_out_mbps = net.out_mbps;
            metrics.net_errors = net.errors;
            metrics.net_drops = net.drops;
        }

        metrics
    }
}

/// Reads host counters
#[derive(Debug, Clone)]
pub struct HostCollector {
    proc_root: PathBuf,
    host_root: PathBuf,
}

impl HostCollector {
    pub fn new(proc_root: impl Into<PathBuf>, host_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            host_root: host_root.into(),
        }
    }

    /// Read every host source; `None` when the proc mount is missing
    pub async fn read(&self) -> Option<HostReadings> {
        if fs::metadata(&self.proc_root).await.is_err() {
            debug!(path = %self.proc_root.display(), "Host proc path not present");
            return None;
        }

        let read = |name: &str| {
            let path = self.proc_root.join(name);
            async move {
                match fs::read_to_string(&path).await {
                    Ok(content) => Some(content),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to read host file");
                        None
                    }
                }
            }
        };

        let (stat, meminfo, loadavg, netdev) = tokio::join!(
            read("stat"),
            read("meminfo"),
            read("loadavg"),
            // PID 1's namespace is the host's, /proc/net would be ours
            read("1/net/dev"),
        );
        let read_at = Instant::now();

        let host_root = self.host_root.clone();
        let disk = tokio::task::spawn_blocking(move || disk_usage(&host_root))
            .await
            .ok()
            .flatten();

        Some(HostReadings {
            cpu: stat.as_deref().and_then(parse_proc_stat),
            memory: meminfo.as_deref().and_then(parse_meminfo),
            load: loadavg.as_deref().and_then(parse_loadavg),
            net: netdev.as_deref().map(parse_net_dev),
            disk,
            read_at: Some(read_at),
        })
    }
}

/// Aggregate `cpu ` line of `/proc/stat`
pub fn parse_proc_stat(content: &str) -> Option<CpuSample> {
    let line = content.lines().next()?;
    let fields = line.strip_prefix("cpu ")?;

    // user nice system idle iowait irq softirq steal guest guest_nice
    let values: Vec<u64> = fields
        .split_whitespace()
        .take(10)
        .map(|v| v.parse().unwrap_or(0))
        .collect();
    if values.len() < 4 {
        return None;
    }

    Some(CpuSample {
        idle: values[3],
        total: values.iter().sum(),
    })
}

/// `(total_mb, used_mb)` from `/proc/meminfo`, used = total - available
pub fn parse_meminfo(content: &str) -> Option<(f64, f64)> {
    let value = |key: &str| {
        content
            .lines()
            .find_map(|line| line.strip_prefix(key))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|kb| kb.parse::<u64>().ok())
    };

    let total = value("MemTotal:").filter(|t| *t > 0)?;
    let available = value("MemAvailable:").unwrap_or(0);

    Some((
        round2(total as f64 / 1024.0),
        round2(total.saturating_sub(available) as f64 / 1024.0),
    ))
}

pub fn parse_loadavg(content: &str) -> Option<[f64; 3]> {
    let mut fields = content.split_whitespace().map(|f| f.parse::<f64>().ok());
    Some([fields.next()??, fields.next()??, fields.next()??])
}

/// Sum of all non-loopback interfaces in `/proc/<pid>/net/dev`
pub fn parse_net_dev(content: &str) -> NetSample {
    let mut sum = NetSample::default();

    for line in content.lines() {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<u64> = counters
            .split_whitespace()
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        if fields.len() < 12 {
            continue;
        }

        // rx: bytes packets errs drop fifo frame compressed multicast
        // tx: bytes packets errs drop ...
        sum.add(&NetSample {
            rx_bytes: fields[0],
            rx_errors: fields[2],
            rx_dropped: fields[3],
            tx_bytes: fields[8],
            tx_errors: fields[10],
            tx_dropped: fields[11],
        });
    }

    sum
}

/// `(total_gb, used_gb)` of the filesystem holding `path`
#[cfg(unix)]
#[allow(clippy::unnecessary_cast)] // statvfs field widths differ between platforms
fn disk_usage(path: &Path) -> Option<(f64, f64)> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: `stat` is a plain C struct and `c_path` is NUL-terminated
    let stat = unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            debug!(path = %path.display(), "statvfs failed");
            return None;
        }
        stat
    };

    let frsize = stat.f_frsize as u64;
    let total = (stat.f_blocks as u64).saturating_mul(frsize);
    let used = (stat.f_blocks as u64)
        .saturating_sub(stat.f_bfree as u64)
        .saturating_mul(frsize);

    Some((round2(total as f64 / 1e9), round2(used as f64 / 1e9)))
}

#[cfg(not(unix))]
fn disk_usage(_path: &Path) -> Option<(f64, f64)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 9999999    100    0    0    0     0          0         0  9999999     100    0    0    0     0       0          0
  eth0: 1000000    500    2    1    0     0          0         0  2000000     400    3    4    0     0       0          0
  eth1:  500000     50    0    0    0     0          0         0        0       0    0    0    0     0       0          0
";

    #[test]
    fn test_parse_proc_stat() {
        let sample = parse_proc_stat("cpu  10 0 20 100 5 0 0 0 0 0\ncpu0 1 2 3 4\n").unwrap();
        assert_eq!(sample, CpuSample { idle: 100, total: 135 });

        assert!(parse_proc_stat("cpu0 1 2 3 4\n").is_none());
        assert!(parse_proc_stat("cpu  1 2\n").is_none());
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "MemTotal:        2048000 kB\nMemFree:          100000 kB\nMemAvailable:    1024000 kB\n";
        assert_eq!(parse_meminfo(content), Some((2000.0, 1000.0)));
        assert!(parse_meminfo("MemFree: 1 kB\n").is_none());
    }

    #[test]
    fn test_parse_loadavg() {
        assert_eq!(
            parse_loadavg("0.52 0.58 0.59 1/389 12345\n"),
            Some([0.52, 0.58, 0.59])
        );
        assert!(parse_loadavg("0.52 0.58\n").is_none());
    }

    #[test]
    fn test_parse_net_dev_skips_loopback() {
        let sample = parse_net_dev(NET_DEV);
        assert_eq!(sample.rx_bytes, 1_500_000);
        assert_eq!(sample.tx_bytes, 2_000_000);
        assert_eq!(sample.rx_errors, 2);
        assert_eq!(sample.tx_errors, 3);
        assert_eq!(sample.rx_dropped, 1);
        assert_eq!(sample.tx_dropped, 4);
    }

    #[test]
    fn test_readings_into_metrics_uses_previous_sample() {
        let mut rates = RateState::new();
        let start = Instant::now();

        let first = HostReadings {
            cpu: Some(CpuSample { idle: 100, total: 200 }),
            net: Some(NetSample::default()),
            load: Some([1.0, 2.0, 3.0]),
            read_at: Some(start),
            ..Default::default()
        };
        let metrics = first.into_metrics(&mut rates, 1);
        assert_eq!(metrics.cpu_percent, 0.0);
        assert_eq!(metrics.net_in_mbps, 0.0);
        assert_eq!(metrics.load_avg_15m, 3.0);

        let second = HostReadings {
            cpu: Some(CpuSample { idle: 150, total: 300 }),
            net: Some(NetSample {
                rx_bytes: 1_000_000,
                ..Default::default()
            }),
            read_at: Some(start + Duration::from_secs(8)),
            ..Default::default()
        };
        let metrics = second.into_metrics(&mut rates, 2);
        assert_eq!(metrics.cpu_percent, 50.0);
        assert_eq!(metrics.net_in_mbps, 1.0);
    }

    #[test]
    fn test_readings_from_older_cycle_skip_rates() {
        let mut rates = RateState::new();
        let start = Instant::now();

        let newer = HostReadings {
            cpu: Some(CpuSample { idle: 150, total: 300 }),
            net: Some(NetSample {
                rx_bytes: 2_000_000,
                ..Default::default()
            }),
            read_at: Some(start + Duration::from_secs(8)),
            ..Default::default()
        };
        newer.into_metrics(&mut rates, 2);

        let older = HostReadings {
            cpu: Some(CpuSample { idle: 100, total: 200 }),
            net: Some(NetSample::default()),
            memory: Some((2048.0, 1024.0)),
            read_at: Some(start),
            ..Default::default()
        };
        let metrics = older.into_metrics(&mut rates, 1);
        assert_eq!(metrics.cpu_percent, 0.0);
        assert_eq!(metrics.net_in_mbps, 0.0);
        assert_eq!(metrics.memory_used_mb, 1024.0);

        // The next cycle is measured against cycle 2, not cycle 1
        let next = HostReadings {
            cpu: Some(CpuSample { idle: 175, total: 400 }),
            net: Some(NetSample {
                rx_bytes: 3_000_000,
                ..Default::default()
            }),
            read_at: Some(start + Duration::from_secs(16)),
            ..Default::default()
        };
        let metrics = next.into_metrics(&mut rates, 3);
        assert_eq!(metrics.cpu_percent, 75.0);
        assert_eq!(metrics.net_in_mbps, 1.0);
    }

    #[tokio::test]
    async fn test_read_missing_proc() {
        let temp = TempDir::new().unwrap();
        let collector = HostCollector::new(temp.path().join("proc"), temp.path());
        assert!(collector.read().await.is_none());
    }

    #[tokio::test]
    async fn test_read_fake_proc() {
        let temp = TempDir::new().unwrap();
        let proc_root = temp.path().join("proc");
        std::fs::create_dir_all(proc_root.join("1/net")).unwrap();
        std::fs::write(proc_root.join("stat"), "cpu  10 0 20 100 5 0 0 0 0 0\n").unwrap();
        std::fs::write(
            proc_root.join("meminfo"),
            "MemTotal: 2048 kB\nMemAvailable: 1024 kB\n",
        )
        .unwrap();
        std::fs::write(proc_root.join("loadavg"), "0.10 0.20 0.30 1/1 1\n").unwrap();
        std::fs::write(proc_root.join("1/net/dev"), NET_DEV).unwrap();

        let readings = HostCollector::new(&proc_root, temp.path())
            .read()
            .await
            .unwrap();
        assert_eq!(readings.cpu.unwrap().idle, 100);
        assert_eq!(readings.memory, Some((2.0, 1.0)));
        assert_eq!(readings.load, Some([0.1, 0.2, 0.3]));
        assert_eq!(readings.net.unwrap().rx_bytes, 1_500_000);
        #[cfg(unix)]
        assert!(readings.disk.is_some());
    }
}
