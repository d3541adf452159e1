//! TetherCluster watch feeding the registry
//!
//! Watch events are turned into add/update/delete calls. The dispatcher
//! remembers the last version of every cluster it handed to the registry so
//! updates carry their previous version, and so a relist can delete clusters
//! that vanished while the watch was down.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_common::crd::TetherCluster;
use tether_common::kube_utils::WATCH_TIMEOUT_SECS;

use crate::registry::ClusterRegistry;

/// Translates watch events into registry calls
pub struct ClusterEventDispatcher {
    registry: Arc<ClusterRegistry>,
    known: HashMap<String, TetherCluster>,
    relist: Option<HashSet<String>>,
}

impl ClusterEventDispatcher {
    /// Dispatcher driving `registry`
    pub fn new(registry: Arc<ClusterRegistry>) -> Self {
        Self {
            registry,
            known: HashMap::new(),
            relist: None,
        }
    }

    /// Apply one watch event
    pub async fn handle(&mut self, event: Event<TetherCluster>) {
        match event {
            Event::Init => {
                debug!("Cluster relist started");
                self.relist = Some(HashSet::new());
            }
            Event::InitApply(cluster) => {
                if let Some(seen) = self.relist.as_mut() {
                    seen.insert(cluster.name_any());
                }
                self.apply(cluster).await;
            }
            Event::Apply(cluster) => self.apply(cluster).await,
            Event::Delete(cluster) => {
                self.known.remove(&cluster.name_any());
                self.registry.on_delete(&cluster).await;
            }
            Event::InitDone => {
                let Some(seen) = self.relist.take() else {
                    return;
                };
                let vanished: Vec<String> = self
                    .known
                    .keys()
                    .filter(|name| !seen.contains(*name))
                    .cloned()
                    .collect();
                for name in vanished {
                    if let Some(cluster) = self.known.remove(&name) {
                        info!(cluster = %name, "Cluster vanished during relist");
                        self.registry.on_delete(&cluster).await;
                    }
                }
                debug!(clusters = self.known.len(), "Cluster relist complete");
            }
        }
    }

    async fn apply(&mut self, cluster: TetherCluster) {
        let name = cluster.name_any();
        match self.known.insert(name, cluster.clone()) {
            Some(old) => self.registry.on_update(&old, cluster).await,
            None => self.registry.on_add(cluster).await,
        }
    }
}

/// Watch TetherClusters through `api` until `cancel` fires
pub async fn run_cluster_watch(
    api: Api<TetherCluster>,
    registry: Arc<ClusterRegistry>,
    cancel: CancellationToken,
) {
    info!("Starting cluster watcher");
    let mut dispatcher = ClusterEventDispatcher::new(registry);
    let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
    let mut stream = watcher::watcher(api, config)
        .default_backoff()
        .boxed();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(event)) => dispatcher.handle(event).await,
                Some(Err(e)) => warn!(error = %e, "Cluster watch error"),
                None => break,
            },
        }
    }
    info!("Cluster watcher stopped");
}
