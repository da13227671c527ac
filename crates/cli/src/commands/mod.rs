//! Subcommand implementations

pub mod containers;
pub mod countries;
pub mod status;
