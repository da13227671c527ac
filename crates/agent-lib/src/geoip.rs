//! Offline IP → country resolution
//!
//! Backed by a MaxMind country database. A missing database disables
//! self-observed country statistics; it never fails the cycle.

use dashmap::DashMap;
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info, warn};

/// Country code returned when the database has no answer for an address
pub const UNKNOWN_COUNTRY: &str = "XX";

/// Addresses memoized before the memo is dropped and rebuilt
const MEMO_CAPACITY: usize = 65_536;

/// Resolves a remote address to an ISO country code
pub trait CountryLookup: Send + Sync {
    /// ISO 3166 alpha-2 code, `XX` when unknown, empty to skip the address
    fn lookup(&self, ip: IpAddr) -> String;
}

/// Address → country memo that never holds more than `capacity` entries
struct CountryMemo {
    entries: DashMap<IpAddr, String>,
    capacity: usize,
}

impl CountryMemo {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn get_or_insert_with(&self, ip: IpAddr, resolve: impl FnOnce() -> String) -> String {
        if let Some(code) = self.entries.get(&ip) {
            return code.clone();
        }
        let code = resolve();
        if self.entries.len() >= self.capacity {
            debug!(entries = self.entries.len(), "GeoIP memo full, clearing");
            self.entries.clear();
        }
        self.entries.insert(ip, code.clone());
        code
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// MaxMind-backed resolver with a bounded per-address memo
pub struct GeoIpResolver {
    reader: Reader<Vec<u8>>,
    memo: CountryMemo,
}

impl GeoIpResolver {
    /// Open the database at `path`
    ///
    /// Returns `None` (and logs why) when the file is absent or unreadable.
    pub fn open(path: &Path) -> Option<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "GeoIP database not found, country resolution disabled");
            return None;
        }

        match Reader::open_readfile(path) {
            Ok(reader) => {
                info!(path = %path.display(), "GeoIP database loaded");
                Some(Self {
                    reader,
                    memo: CountryMemo::with_capacity(MEMO_CAPACITY),
                })
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open GeoIP database, country resolution disabled");
                None
            }
        }
    }

    fn resolve(&self, ip: IpAddr) -> String {
        match self.reader.lookup::<geoip2::Country>(ip) {
            Ok(record) => record
                .country
                .and_then(|c| c.iso_code)
                .filter(|code| !code.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string()),
            Err(_) => UNKNOWN_COUNTRY.to_string(),
        }
    }
}

impl CountryLookup for GeoIpResolver {
    fn lookup(&self, ip: IpAddr) -> String {
        self.memo.get_or_insert_with(ip, || self.resolve(ip))
    }
}
