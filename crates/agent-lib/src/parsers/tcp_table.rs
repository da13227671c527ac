//! Kernel TCP socket table decoding
//!
//! Reads `/proc/<pid>/net/tcp` and `/proc/<pid>/net/tcp6` and reduces them to
//! connection counts, per-state buckets, unique remote IPs and (for
//! established sockets) per-country counts.

use crate::geoip::CountryLookup;
use crate::models::{ConnectionStats, CountryStats};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Address family of a kernel TCP table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// File name under `/proc/<pid>/net`
    pub fn table_name(&self) -> &'static str {
        match self {
            AddressFamily::V4 => "tcp",
            AddressFamily::V6 => "tcp6",
        }
    }
}

/// TCP socket state as encoded in the `st` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpState {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
}

impl TcpState {
    pub const ALL: [TcpState; 11] = [
        TcpState::Established,
        TcpState::SynSent,
        TcpState::SynRecv,
        TcpState::FinWait1,
        TcpState::FinWait2,
        TcpState::TimeWait,
        TcpState::Close,
        TcpState::CloseWait,
        TcpState::LastAck,
        TcpState::Listen,
        TcpState::Closing,
    ];

    /// Decode the two-hex-digit state column
    pub fn from_code(code: &str) -> Option<Self> {
        let value = u8::from_str_radix(code, 16).ok()?;
        match value {
            0x01 => Some(TcpState::Established),
            0x02 => Some(TcpState::SynSent),
            0x03 => Some(TcpState::SynRecv),
            0x04 => Some(TcpState::FinWait1),
            0x05 => Some(TcpState::FinWait2),
            0x06 => Some(TcpState::TimeWait),
            0x07 => Some(TcpState::Close),
            0x08 => Some(TcpState::CloseWait),
            0x09 => Some(TcpState::LastAck),
            0x0A => Some(TcpState::Listen),
            0x0B => Some(TcpState::Closing),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TcpState::Established => "01",
            TcpState::SynSent => "02",
            TcpState::SynRecv => "03",
            TcpState::FinWait1 => "04",
            TcpState::FinWait2 => "05",
            TcpState::TimeWait => "06",
            TcpState::Close => "07",
            TcpState::CloseWait => "08",
            TcpState::LastAck => "09",
            TcpState::Listen => "0A",
            TcpState::Closing => "0B",
        }
    }

    /// Bucket name used in `ConnectionStats::states`
    pub fn name(&self) -> &'static str {
        match self {
            TcpState::Established => "established",
            TcpState::SynSent => "syn_sent",
            TcpState::SynRecv => "syn_recv",
            TcpState::FinWait1 => "fin_wait1",
            TcpState::FinWait2 => "fin_wait2",
            TcpState::TimeWait => "time_wait",
            TcpState::Close => "close",
            TcpState::CloseWait => "close_wait",
            TcpState::LastAck => "last_ack",
            TcpState::Listen => "listen",
            TcpState::Closing => "closing",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }
}

/// One decoded row of a TCP table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub remote_ip: IpAddr,
    pub remote_port: u16,
    /// `None` for state codes outside the known set
    pub state: Option<TcpState>,
}

/// Decode a `HEXADDR:HEXPORT` field
///
/// The port is big-endian. IPv4 addresses are one little-endian 32-bit word;
/// IPv6 addresses are four little-endian 32-bit words, each reversed on its own.
pub fn parse_hex_addr(field: &str, family: AddressFamily) -> Option<(IpAddr, u16)> {
    let (hex_ip, hex_port) = field.split_once(':')?;
    if hex_port.len() != 4 {
        return None;
    }
    let port = u16::from_str_radix(hex_port, 16).ok()?;

    let ip = match family {
        AddressFamily::V4 => {
            if hex_ip.len() != 8 {
                return None;
            }
            let word = u32::from_str_radix(hex_ip, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.swap_bytes()))
        }
        AddressFamily::V6 => {
            if hex_ip.len() != 32 {
                return None;
            }
            let mut octets = [0u8; 16];
            for (group, chunk) in octets.chunks_exact_mut(4).enumerate() {
                let start = group * 8;
                let word = u32::from_str_radix(hex_ip.get(start..start + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.swap_bytes().to_be_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };

    Some((ip, port))
}

/// Parse the text of a TCP table, skipping the header and malformed rows
pub fn parse_tcp_table(content: &str, family: AddressFamily) -> Vec<ConnectionRecord> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            // sl local_address rem_address st tx_queue:rx_queue ...
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            let (remote_ip, remote_port) = parse_hex_addr(fields[2], family)?;
            Some(ConnectionRecord {
                remote_ip,
                remote_port,
                state: TcpState::from_code(fields[3]),
            })
        })
        .collect()
}

/// Counts for one network namespace, before merging with other targets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionSummary {
    pub stats: ConnectionStats,
    /// Established connections by country, sorted descending
    pub countries: Vec<CountryStats>,
}

/// Running tally over one or more TCP tables
#[derive(Debug, Default)]
pub struct ConnectionTally {
    total: u64,
    states: BTreeMap<String, u64>,
    unique_ips: HashSet<IpAddr>,
    countries: HashMap<String, u64>,
}

impl ConnectionTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a batch of records; listening and loopback rows are skipped
    pub fn add(&mut self, records: &[ConnectionRecord], geo: Option<&dyn CountryLookup>) {
        for record in records {
            if record.remote_port == 0 {
                continue;
            }
            // IPv4-mapped IPv6 peers collapse onto their IPv4 form
            let ip = record.remote_ip.to_canonical();
            if ip.is_loopback() {
                continue;
            }

            self.total += 1;
            if let Some(state) = record.state {
                *self.states.entry(state.name().to_string()).or_insert(0) += 1;
            }
            self.unique_ips.insert(ip);

            if record.state == Some(TcpState::Established) {
                if let Some(geo) = geo {
                    let country = geo.lookup(ip);
                    if !country.is_empty() {
                        *self.countries.entry(country).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    pub fn finish(self) -> ConnectionSummary {
        let mut countries: Vec<CountryStats> = self
            .countries
            .into_iter()
            .map(|(country, connections)| CountryStats { country, connections })
            .collect();
        crate::aggregate::sort_countries(&mut countries);

        ConnectionSummary {
            stats: ConnectionStats {
                total: self.total,
                unique_ips: self.unique_ips.len() as u64,
                states: self.states,
            },
            countries,
        }
    }
}

/// Read both TCP tables of a process and summarize them
///
/// A missing or unreadable table contributes nothing.
pub async fn collect_connections(
    proc_root: &Path,
    pid: u32,
    geo: Option<&dyn CountryLookup>,
) -> ConnectionSummary {
    let mut tally = ConnectionTally::new();

    for family in [AddressFamily::V4, AddressFamily::V6] {
        let path = proc_root
            .join(pid.to_string())
            .join("net")
            .join(family.table_name());
        match fs::read_to_string(&path).await {
            Ok(content) => tally.add(&parse_tcp_table(&content, family), geo),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "TCP table unavailable");
            }
        }
    }

    tally.finish()
}
