//! Collection engine for the Conduit expose agent
//!
//! This crate provides the core functionality for:
//! - Discovering and sampling sibling Conduit containers
//! - Host resource and connection-table readings
//! - Manager state file and GeoIP enrichment
//! - Merging everything into one published snapshot
//! - Health checks and observability

pub mod aggregate;
pub mod cache;
pub mod collector;
pub mod error;
pub mod geoip;
pub mod health;
pub mod manager;
pub mod models;
pub mod observability;
pub mod parsers;
pub mod state;

pub use cache::StatusCache;
pub use collector::{
    CollectionConfig, CollectionLoop, CollectionLoopBuilder, ContainerRuntime, DiscoveryFilter,
    DockerRuntime, Timeouts,
};
pub use error::CollectError;
pub use geoip::{CountryLookup, GeoIpResolver};
pub use health::{
    components, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
