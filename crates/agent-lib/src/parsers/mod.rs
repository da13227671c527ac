//! Text decoders for the low-level interfaces the collector reads
//!
//! All parsers are pure: they take the file or response text and never
//! fail loudly. Malformed input is skipped, since partial or noisy data is
//! the normal case for these sources.

pub mod exposition;
pub mod stats_line;
pub mod tcp_table;

pub use exposition::{parse_line, parse_metrics, ExpositionLine, ParsedMetrics};
pub use stats_line::{format_uptime, last_stats_line, parse_stats_line};
pub use tcp_table::{
    collect_connections, parse_hex_addr, parse_tcp_table, AddressFamily, ConnectionRecord,
    ConnectionSummary, ConnectionTally, TcpState,
};
