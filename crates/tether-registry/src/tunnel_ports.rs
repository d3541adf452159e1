//! Per-cluster tunnel port reservations
//!
//! Each registered cluster gets its own [`TunnelPorts`]; it is created with
//! the registry entry and dropped with it.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use parking_lot::Mutex;
use tracing::debug;

use tether_common::Error;

/// First port handed out by default
pub const DEFAULT_TUNNEL_PORT_START: u16 = 10000;
/// Last port handed out by default
pub const DEFAULT_TUNNEL_PORT_END: u16 = 19999;

/// Configuration for a cluster's port cache
#[derive(Clone, Debug)]
pub struct TunnelPortsConfig {
    /// Owning cluster, used in logs and errors
    pub cluster: String,
    /// Ports available for reservation
    pub range: RangeInclusive<u16>,
}

impl TunnelPortsConfig {
    /// Default range for `cluster`
    pub fn for_cluster(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            range: DEFAULT_TUNNEL_PORT_START..=DEFAULT_TUNNEL_PORT_END,
        }
    }
}

#[derive(Default)]
struct Allocations {
    by_key: BTreeMap<String, u16>,
    used: BTreeSet<u16>,
}

/// Tunnel ports reserved on behalf of one cluster
pub struct TunnelPorts {
    config: TunnelPortsConfig,
    state: Mutex<Allocations>,
}

impl TunnelPorts {
    /// Create an empty port cache
    pub fn new(config: TunnelPortsConfig) -> Self {
        Self {
            config,
            state: Mutex::new(Allocations::default()),
        }
    }

    /// Cluster owning these ports
    pub fn cluster(&self) -> &str {
        &self.config.cluster
    }

    /// Reserve a port for `key`, returning the existing one if already reserved
    ///
    /// The lowest free port in the range is chosen.
    pub fn allocate(&self, key: &str) -> Result<u16, Error> {
        let mut state = self.state.lock();
        if let Some(port) = state.by_key.get(key) {
            return Ok(*port);
        }
        let port = self
            .config
            .range
            .clone()
            .find(|p| !state.used.contains(p))
            .ok_or_else(|| Error::PortsExhausted {
                cluster: self.config.cluster.clone(),
                start: *self.config.range.start(),
                end: *self.config.range.end(),
            })?;
        state.used.insert(port);
        state.by_key.insert(key.to_string(), port);
        debug!(cluster = %self.config.cluster, key, port, "Reserved tunnel port");
        Ok(port)
    }

    /// Release the port held by `key`
    pub fn release(&self, key: &str) -> Option<u16> {
        let mut state = self.state.lock();
        let port = state.by_key.remove(key)?;
        state.used.remove(&port);
        debug!(cluster = %self.config.cluster, key, port, "Released tunnel port");
        Some(port)
    }

    /// Port currently held by `key`
    pub fn get(&self, key: &str) -> Option<u16> {
        self.state.lock().by_key.get(key).copied()
    }

    /// All reservations, ordered by key
    pub fn allocations(&self) -> Vec<(String, u16)> {
        self.state
            .lock()
            .by_key
            .iter()
            .map(|(k, p)| (k.clone(), *p))
            .collect()
    }

    /// Number of reserved ports
    pub fn len(&self) -> usize {
        self.state.lock().by_key.len()
    }

    /// True when nothing is reserved
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TunnelPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelPorts")
            .field("cluster", &self.config.cluster)
            .field("range", &self.config.range)
            .field("reserved", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(range: RangeInclusive<u16>) -> TunnelPorts {
        TunnelPorts::new(TunnelPortsConfig {
            cluster: "east".to_string(),
            range,
        })
    }

    #[test]
    fn allocates_lowest_free_port() {
        let ports = small(20000..=20010);
        assert_eq!(ports.allocate("default/web:80").unwrap(), 20000);
        assert_eq!(ports.allocate("default/api:443").unwrap(), 20001);
        assert_eq!(ports.len(), 2);
    }

    #[test]
    fn allocation_is_idempotent_per_key() {
        let ports = small(20000..=20010);
        let first = ports.allocate("default/web:80").unwrap();
        assert_eq!(ports.allocate("default/web:80").unwrap(), first);
        assert_eq!(ports.len(), 1);
    }

    #[test]
    fn released_ports_are_reused() {
        let ports = small(20000..=20010);
        ports.allocate("a").unwrap();
        ports.allocate("b").unwrap();
        assert_eq!(ports.release("a"), Some(20000));
        assert_eq!(ports.get("a"), None);
        assert_eq!(ports.allocate("c").unwrap(), 20000);
        assert_eq!(ports.release("missing"), None);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let ports = small(20000..=20001);
        ports.allocate("a").unwrap();
        ports.allocate("b").unwrap();
        let err = ports.allocate("c").unwrap_err();
        assert!(matches!(err, Error::PortsExhausted { start: 20000, end: 20001, .. }));
    }

    #[test]
    fn allocations_are_sorted_by_key() {
        let ports = small(20000..=20010);
        ports.allocate("zeta").unwrap();
        ports.allocate("alpha").unwrap();
        assert_eq!(
            ports.allocations(),
            vec![("alpha".to_string(), 20001), ("zeta".to_string(), 20000)]
        );
    }

    #[test]
    fn default_config_uses_default_range() {
        let ports = TunnelPorts::new(TunnelPortsConfig::for_cluster("west"));
        assert_eq!(ports.cluster(), "west");
        assert!(ports.is_empty());
        assert_eq!(ports.allocate("x").unwrap(), DEFAULT_TUNNEL_PORT_START);
    }
}
