//! Command line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use tether_common::{DEFAULT_TUNNEL_HEALTH_PORT, TETHER_SYSTEM_NAMESPACE};
use tether_registry::{RegistryConfig, DEFAULT_TUNNEL_PORT_END, DEFAULT_TUNNEL_PORT_START};

/// Tether - multi-cluster tunnel controller
#[derive(Parser, Debug, Clone)]
#[command(name = "tether", version, about, long_about = None)]
pub struct Cli {
    /// Generate the TetherCluster CRD manifest and exit
    #[arg(long)]
    pub crd: bool,

    /// Namespace holding TetherClusters and their identity Secrets
    #[arg(long, env = "TETHER_NAMESPACE", default_value = TETHER_SYSTEM_NAMESPACE)]
    pub namespace: String,

    /// Kubeconfig of the control-plane cluster (in-cluster config when unset)
    ///
    /// Accepts a path list like `KUBECONFIG`; the files are merged and the
    /// first to set a key wins.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Seconds between periodic hub health rounds
    #[arg(long, default_value_t = 10)]
    pub health_interval_secs: u64,

    /// Minimum milliseconds between two hub health rounds
    #[arg(long, default_value_t = 1000)]
    pub health_min_interval_ms: u64,

    /// First tunnel port reserved per cluster
    #[arg(long, default_value_t = DEFAULT_TUNNEL_PORT_START)]
    pub tunnel_port_start: u16,

    /// Last tunnel port reserved per cluster
    #[arg(long, default_value_t = DEFAULT_TUNNEL_PORT_END)]
    pub tunnel_port_end: u16,

    /// Port the tunnel Services answer liveness probes on
    #[arg(long, default_value_t = DEFAULT_TUNNEL_HEALTH_PORT)]
    pub tunnel_health_port: u16,

    /// Emit JSON log lines
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    /// Registry configuration described by these flags
    pub fn registry_config(&self) -> anyhow::Result<RegistryConfig> {
        if self.tunnel_port_start > self.tunnel_port_end {
            anyhow::bail!(
                "--tunnel-port-start ({}) is greater than --tunnel-port-end ({})",
                self.tunnel_port_start,
                self.tunnel_port_end
            );
        }
        Ok(RegistryConfig {
            namespace: self.namespace.clone(),
            tunnel_port_range: self.tunnel_port_start..=self.tunnel_port_end,
            tunnel_health_port: self.tunnel_health_port,
        })
    }

    /// Period of the health loop
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    /// Debounce interval of the health monitor
    pub fn health_min_interval(&self) -> Duration {
        Duration::from_millis(self.health_min_interval_ms)
    }
}
