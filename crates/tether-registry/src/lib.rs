//! Tether Registry - runtime state of every remote cluster
//!
//! This crate turns TetherCluster descriptors into live per-cluster resources:
//!
//! - **Cluster Registry**: Reconciles add/update/delete events into clients,
//!   service caches, tunnel ports and identity tokens
//! - **Gateway Resolution**: Turns tunnel paths into proxy URIs
//! - **Status Write-back**: Import/export lists, phase and hub conditions
//! - **Cluster Watch**: Feeds the registry from the TetherCluster watch

#![deny(missing_docs)]

pub mod identity;
pub mod registry;
pub mod remote_client;
pub mod service_cache;
pub mod status;
pub mod tunnel_ports;
pub mod watch;

pub use identity::{derive_identity_token, KubeSecretStore, SecretStore};
pub use registry::{gateway_uri, ClusterRegistry, ClusterRegistryBuilder, RegistryConfig, SyncFn};
pub use remote_client::{KubeconfigClientFactory, RemoteClient, RemoteClientFactory};
pub use service_cache::{
    ServiceCache, ServiceCacheFactory, WatchedServiceCache, WatchedServiceCacheFactory,
};
pub use status::{next_cluster_status, KubeStatusSink, StatusSink};
pub use tunnel_ports::{
    TunnelPorts, TunnelPortsConfig, DEFAULT_TUNNEL_PORT_END, DEFAULT_TUNNEL_PORT_START,
};
pub use watch::{run_cluster_watch, ClusterEventDispatcher};
