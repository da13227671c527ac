//! State carried between collection cycles
//!
//! Both state objects are owned by the collection loop and passed by
//! reference into each cycle; nothing here is process-global.

mod rate;
mod session;

pub use rate::{
    round2, CpuRateState, CpuSample, NetRateState, NetRates, NetSample, RateState,
};
pub use session::{SessionSample, SessionTracker, SessionUpdate, TargetTraffic};
