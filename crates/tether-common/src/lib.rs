//! Common types for Tether: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace for Tether system resources (cluster descriptors, identity secrets)
pub const TETHER_SYSTEM_NAMESPACE: &str = "tether-system";

/// Field manager used for server-side status writes
pub const FIELD_MANAGER: &str = "tether-controller";

/// Key inside a cluster's secret that holds the raw tunnel identity
pub const IDENTITY_SECRET_KEY: &str = "identity";

/// Name prefix of the in-control-plane Service fronting a hub's tunnel
pub const TUNNEL_SERVICE_PREFIX: &str = "tether-tunnel-";

/// Default port the tunnel answers liveness probes on
pub const DEFAULT_TUNNEL_HEALTH_PORT: u16 = 8080;
