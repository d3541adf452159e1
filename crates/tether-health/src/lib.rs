//! Tether Health - liveness of hub tunnel endpoints
//!
//! Periodically probes each registered hub's in-control-plane tunnel Service
//! and records the result as a `TunnelHealth` condition on the hub.

#![deny(missing_docs)]

pub mod monitor;
pub mod probe;

pub use monitor::{HealthMonitor, HubSource, DEFAULT_MIN_INTERVAL};
pub use probe::{HttpProbeClient, ProbeClient, DEFAULT_PROBE_TIMEOUT};
