//! Controller runner - wires the registry, cluster watch and health monitor

use std::sync::Arc;

use kube::{Api, Client};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tether_common::crd::TetherCluster;
use tether_common::kube_utils::create_client;
use tether_health::{HealthMonitor, HttpProbeClient};
use tether_registry::{
    run_cluster_watch, ClusterRegistry, KubeSecretStore, KubeStatusSink, RegistryConfig,
};

use crate::cli::Cli;

/// Build the registry against the control-plane cluster
///
/// `on_change` fires whenever cluster topology changes.
pub fn build_registry(
    client: Client,
    config: RegistryConfig,
    on_change: Arc<Notify>,
    cancel: CancellationToken,
) -> ClusterRegistry {
    let secrets = KubeSecretStore::new(client.clone(), &config.namespace);
    let status = KubeStatusSink::new(client, &config.namespace);
    ClusterRegistry::builder(Arc::new(secrets), Arc::new(status))
        .config(config)
        .sync_fn(Arc::new(move || on_change.notify_one()))
        .cancellation(cancel)
        .build()
}

/// Run a health round whenever `trigger` is notified, until `cancel` fires
pub async fn run_health_on_change(
    monitor: Arc<HealthMonitor>,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = trigger.notified() => monitor.sync().await,
        }
    }
}

/// Run the controller until SIGINT
pub async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    let config = cli.registry_config()?;
    let namespace = config.namespace.clone();

    let client = create_client(cli.kubeconfig.as_deref()).await?;
    let cancel = CancellationToken::new();
    let on_change = Arc::new(Notify::new());

    let registry = Arc::new(build_registry(
        client.clone(),
        config,
        on_change.clone(),
        cancel.clone(),
    ));
    let monitor = Arc::new(
        HealthMonitor::new(registry.clone(), Arc::new(HttpProbeClient::new()?))
            .with_min_interval(cli.health_min_interval()),
    );

    info!(namespace = %namespace, "Starting tether controller");

    let clusters: Api<TetherCluster> = Api::namespaced(client, &namespace);
    let watch = tokio::spawn(run_cluster_watch(clusters, registry.clone(), cancel.clone()));
    let periodic = tokio::spawn({
        let monitor = monitor.clone();
        let cancel = cancel.clone();
        let interval = cli.health_interval();
        async move { monitor.run(cancel, interval).await }
    });
    let triggered = tokio::spawn(run_health_on_change(monitor, on_change, cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    cancel.cancel();

    for task in [watch, periodic, triggered] {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Controller task panicked");
        }
    }
    info!(clusters = registry.len().await, "Tether controller stopped");
    Ok(())
}
