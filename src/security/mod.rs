//! Admission control for completion requests.

pub mod rate_gate;

pub use rate_gate::{Clock, ManualClock, RateGate, RateLimits, SystemClock};
