//! Conduit expose agent
//!
//! Configuration and the HTTP boundary of the `conduit-expose` binary. The
//! collection engine lives in `expose-lib`.

pub mod api;
pub mod config;
