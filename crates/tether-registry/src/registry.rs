//! Cluster Registry - live runtime state for every declared TetherCluster
//!
//! The registry turns TetherCluster watch events into per-cluster resources:
//! - **Remote client**: rebuilt only when the kubeconfig bytes change
//! - **Service cache**: started once, reset in place on credential rotation
//! - **Tunnel ports**: created and dropped with the cluster
//! - **Identity token**: re-derived on every update, since the backing
//!   Secret can rotate without the descriptor changing
//!
//! All per-cluster state lives in one map behind one `RwLock`. Event
//! handlers take the write lock; accessors and status writes take the read
//! lock. A failing sub-step is logged against its cluster and never drops
//! the entry.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_common::crd::{set_condition, ClusterPhase, Condition, GatewayWay, TetherCluster};
use tether_common::{
    Error, Result, DEFAULT_TUNNEL_HEALTH_PORT, TETHER_SYSTEM_NAMESPACE, TUNNEL_SERVICE_PREFIX,
};

use crate::identity::{derive_identity_token, SecretStore};
use crate::remote_client::{KubeconfigClientFactory, RemoteClient, RemoteClientFactory};
use crate::service_cache::{ServiceCache, ServiceCacheFactory, WatchedServiceCacheFactory};
use crate::status::{next_cluster_status, StatusSink};
use crate::tunnel_ports::{
    TunnelPorts, TunnelPortsConfig, DEFAULT_TUNNEL_PORT_END, DEFAULT_TUNNEL_PORT_START,
};

/// Callback fired after any topology-affecting reconciliation
pub type SyncFn = Arc<dyn Fn() + Send + Sync>;

/// Static configuration of a registry
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Namespace holding TetherClusters and their identity Secrets
    pub namespace: String,
    /// Port range handed to each cluster's [`TunnelPorts`]
    pub tunnel_port_range: RangeInclusive<u16>,
    /// Port the in-control-plane tunnel Services answer probes on
    pub tunnel_health_port: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            namespace: TETHER_SYSTEM_NAMESPACE.to_string(),
            tunnel_port_range: DEFAULT_TUNNEL_PORT_START..=DEFAULT_TUNNEL_PORT_END,
            tunnel_health_port: DEFAULT_TUNNEL_HEALTH_PORT,
        }
    }
}

/// Everything the registry holds for one cluster
struct RegistryEntry {
    cluster: Arc<TetherCluster>,
    remote_client: Option<RemoteClient>,
    service_cache: Arc<dyn ServiceCache>,
    tunnel_ports: Arc<TunnelPorts>,
    identity: Option<String>,
}

/// Build the SSH tunnel URI for a gateway address and identity token
pub fn gateway_uri(address: &str, identity: &str) -> String {
    format!("ssh://{}?identity_data={}", address, identity)
}

/// Registry of all remote clusters known to this controller
pub struct ClusterRegistry {
    config: RegistryConfig,
    entries: RwLock<HashMap<String, RegistryEntry>>,
    clients: Arc<dyn RemoteClientFactory>,
    caches: Arc<dyn ServiceCacheFactory>,
    secrets: Arc<dyn SecretStore>,
    status: Arc<dyn StatusSink>,
    sync_fn: SyncFn,
    cancel: CancellationToken,
}

impl ClusterRegistry {
    /// Start building a registry around its secret store and status sink
    pub fn builder(
        secrets: Arc<dyn SecretStore>,
        status: Arc<dyn StatusSink>,
    ) -> ClusterRegistryBuilder {
        ClusterRegistryBuilder::new(secrets, status)
    }

    /// Configuration the registry was built with
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Register a newly observed cluster
    pub async fn on_add(&self, cluster: TetherCluster) {
        let name = cluster.name_any();
        info!(cluster = %name, "Cluster added");

        let mut entries = self.entries.write().await;
        self.register(&mut entries, name, cluster).await;
        drop(entries);

        (self.sync_fn)();
    }

    /// Apply a new version of an already registered cluster
    pub async fn on_update(&self, old: &TetherCluster, new: TetherCluster) {
        let name = new.name_any();
        info!(
            cluster = %name,
            old_version = %old.resource_version().unwrap_or_default(),
            new_version = %new.resource_version().unwrap_or_default(),
            "Cluster updated"
        );

        let mut entries = self.entries.write().await;
        if !entries.contains_key(&name) {
            warn!(cluster = %name, "Update for unregistered cluster, registering it");
            self.register(&mut entries, name, new).await;
            drop(entries);
            (self.sync_fn)();
            return;
        }
        let Some(entry) = entries.get_mut(&name) else {
            return;
        };

        match derive_identity_token(self.secrets.as_ref(), &name).await {
            Ok(token) => entry.identity = Some(token),
            Err(e) => e.log(&name, "Failed to refresh identity, keeping previous"),
        }

        if entry.cluster.spec == new.spec {
            debug!(cluster = %name, "Spec unchanged, keeping resources");
            entry.cluster = Arc::new(new);
            return;
        }

        if entry.cluster.spec.kubeconfig != new.spec.kubeconfig {
            match self.clients.build(&new.spec.kubeconfig).await {
                Ok(client) => {
                    info!(cluster = %name, "Kubeconfig changed, rebuilt remote client");
                    entry.remote_client = Some(client.clone());
                    if let Err(e) = entry.service_cache.reset_client(client).await {
                        e.log(&name, "Failed to reset service cache onto new client");
                    }
                }
                Err(e) => {
                    e.log(&name, "Failed to build remote client, keeping previous");
                }
            }
        }

        entry.cluster = Arc::new(new);
        drop(entries);

        (self.sync_fn)();
    }

    /// Forget a deleted cluster and release its resources
    pub async fn on_delete(&self, cluster: &TetherCluster) {
        let name = cluster.name_any();
        info!(cluster = %name, "Cluster deleted");

        let removed = self.entries.write().await.remove(&name);
        match removed {
            Some(entry) => {
                entry.service_cache.close();
                debug!(
                    cluster = %name,
                    released_ports = entry.tunnel_ports.len(),
                    "Released cluster resources"
                );
            }
            None => debug!(cluster = %name, "Delete for unregistered cluster"),
        }

        (self.sync_fn)();
    }

    async fn register(
        &self,
        entries: &mut HashMap<String, RegistryEntry>,
        name: String,
        cluster: TetherCluster,
    ) {
        if let Some(previous) = entries.remove(&name) {
            warn!(cluster = %name, "Cluster registered twice, replacing previous entry");
            previous.service_cache.close();
        }

        let remote_client = match self.clients.build(&cluster.spec.kubeconfig).await {
            Ok(client) => Some(client),
            Err(e) => {
                e.log(&name, "Failed to build remote client");
                None
            }
        };

        let tunnel_ports = Arc::new(TunnelPorts::new(TunnelPortsConfig {
            cluster: name.clone(),
            range: self.config.tunnel_port_range.clone(),
        }));

        let service_cache = self.caches.create(&name, remote_client.clone());
        if let Err(e) = service_cache.start(self.cancel.child_token()).await {
            e.log(&name, "Failed to start service cache");
        }

        let initial = next_cluster_status(
            cluster.status.as_ref(),
            Vec::new(),
            Vec::new(),
            ClusterPhase::Pending,
        );
        if let Err(e) = self.status.write_cluster_status(&name, &initial).await {
            e.log(&name, "Failed to write initial status");
        }

        let identity = match derive_identity_token(self.secrets.as_ref(), &name).await {
            Ok(token) => Some(token),
            Err(e) => {
                e.log(&name, "Failed to derive identity");
                None
            }
        };

        entries.insert(
            name,
            RegistryEntry {
                cluster: Arc::new(cluster),
                remote_client,
                service_cache,
                tunnel_ports,
                identity,
            },
        );
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Cached descriptor of cluster `name`
    pub async fn get(&self, name: &str) -> Option<Arc<TetherCluster>> {
        let entries = self.entries.read().await;
        entries.get(name).map(|e| e.cluster.clone())
    }

    /// API client of cluster `name`, if one could be built
    pub async fn remote_client(&self, name: &str) -> Option<RemoteClient> {
        let entries = self.entries.read().await;
        entries.get(name).and_then(|e| e.remote_client.clone())
    }

    /// Service cache of cluster `name`
    pub async fn service_cache(&self, name: &str) -> Option<Arc<dyn ServiceCache>> {
        let entries = self.entries.read().await;
        entries.get(name).map(|e| e.service_cache.clone())
    }

    /// Services mirrored from cluster `name`, oldest first
    ///
    /// Unknown clusters yield an empty list.
    pub async fn services(&self, name: &str) -> Vec<Arc<Service>> {
        let entries = self.entries.read().await;
        let Some(entry) = entries.get(name) else {
            return Vec::new();
        };

        let mut services = Vec::new();
        entry
            .service_cache
            .for_each(&mut |svc: &Arc<Service>| services.push(svc.clone()));
        drop(entries);

        services.sort_by_key(|svc| svc.metadata.creation_timestamp.as_ref().map(|t| t.0));
        services
    }

    /// Tunnel identity token of cluster `name`
    pub async fn identity(&self, name: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries.get(name).and_then(|e| e.identity.clone())
    }

    /// Tunnel port reservations of cluster `name`
    pub async fn tunnel_ports(&self, name: &str) -> Option<Arc<TunnelPorts>> {
        let entries = self.entries.read().await;
        entries.get(name).map(|e| e.tunnel_ports.clone())
    }

    /// Names of all registered clusters, sorted
    pub async fn cluster_names(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered clusters
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when no cluster is registered
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Address of cluster `name`'s tunnel endpoint inside the control plane
    pub async fn tunnel_address(&self, name: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries.contains_key(name).then(|| {
            format!(
                "{}{}.{}.svc:{}",
                TUNNEL_SERVICE_PREFIX, name, self.config.namespace, self.config.tunnel_health_port
            )
        })
    }

    // =========================================================================
    // Gateway resolution
    // =========================================================================

    /// Resolve one tunnel hop to a proxy URI
    ///
    /// A literal proxy is returned as-is. A cluster reference becomes
    /// `ssh://<gateway address>?identity_data=<identity>`.
    pub async fn resolve_gateway_way(&self, way: &GatewayWay) -> Result<String> {
        if let Some(proxy) = way.override_proxy() {
            return Ok(proxy.to_string());
        }

        let name = way
            .cluster_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::validation("gateway way sets neither proxy nor clusterName"))?;

        let entries = self.entries.read().await;
        let entry = entries
            .get(name)
            .ok_or_else(|| Error::cluster_not_found(name))?;

        let address = &entry.cluster.spec.gateway.address;
        if address.is_empty() {
            return Err(Error::no_gateway_address(name));
        }
        Ok(gateway_uri(address, entry.identity.as_deref().unwrap_or_default()))
    }

    /// Resolve a tunnel path in order, failing on the first bad hop
    pub async fn resolve_gateway_ways(&self, ways: &[GatewayWay]) -> Result<Vec<String>> {
        let mut uris = Vec::with_capacity(ways.len());
        for way in ways {
            uris.push(self.resolve_gateway_way(way).await?);
        }
        Ok(uris)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Record which clusters `name` imports from and exports to
    ///
    /// Both lists are written sorted.
    pub async fn update_status(
        &self,
        name: &str,
        imported_from: Vec<String>,
        exported_to: Vec<String>,
        phase: ClusterPhase,
    ) -> Result<()> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(name)
            .ok_or_else(|| Error::cluster_not_found(name))?;

        let status = next_cluster_status(
            entry.cluster.status.as_ref(),
            imported_from,
            exported_to,
            phase,
        );
        self.status.write_cluster_status(name, &status).await
    }

    /// Merge `conditions` into the cached conditions of `name` and write them
    pub async fn update_hub_conditions(&self, name: &str, conditions: Vec<Condition>) -> Result<()> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(name)
            .ok_or_else(|| Error::cluster_not_found(name))?;

        let mut merged = entry
            .cluster
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        for condition in conditions {
            set_condition(&mut merged, condition);
        }
        self.status.write_hub_conditions(name, &merged).await
    }
}

impl std::fmt::Debug for ClusterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ClusterRegistry`]
///
/// Secrets and status are required; the client and cache factories default
/// to the Kubernetes-backed implementations.
pub struct ClusterRegistryBuilder {
    config: RegistryConfig,
    secrets: Arc<dyn SecretStore>,
    status: Arc<dyn StatusSink>,
    clients: Option<Arc<dyn RemoteClientFactory>>,
    caches: Option<Arc<dyn ServiceCacheFactory>>,
    sync_fn: Option<SyncFn>,
    cancel: Option<CancellationToken>,
}

impl ClusterRegistryBuilder {
    fn new(secrets: Arc<dyn SecretStore>, status: Arc<dyn StatusSink>) -> Self {
        Self {
            config: RegistryConfig::default(),
            secrets,
            status,
            clients: None,
            caches: None,
            sync_fn: None,
            cancel: None,
        }
    }

    /// Set the registry configuration
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the remote client factory (primarily for testing)
    pub fn client_factory(mut self, clients: Arc<dyn RemoteClientFactory>) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Override the service cache factory (primarily for testing)
    pub fn service_cache_factory(mut self, caches: Arc<dyn ServiceCacheFactory>) -> Self {
        self.caches = Some(caches);
        self
    }

    /// Callback fired when cluster topology changes
    pub fn sync_fn(mut self, sync_fn: SyncFn) -> Self {
        self.sync_fn = Some(sync_fn);
        self
    }

    /// Controller-lifetime token that service caches run under
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Build the registry
    pub fn build(self) -> ClusterRegistry {
        ClusterRegistry {
            config: self.config,
            entries: RwLock::new(HashMap::new()),
            clients: self
                .clients
                .unwrap_or_else(|| Arc::new(KubeconfigClientFactory::default())),
            caches: self
                .caches
                .unwrap_or_else(|| Arc::new(WatchedServiceCacheFactory)),
            secrets: self.secrets,
            status: self.status,
            sync_fn: self.sync_fn.unwrap_or_else(|| Arc::new(|| {})),
            cancel: self.cancel.unwrap_or_default(),
        }
    }
}
