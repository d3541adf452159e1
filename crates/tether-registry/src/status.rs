//! Status write-back for TetherCluster objects
//!
//! Status is the only way anything outside the registry changes cluster
//! state. Lists are sorted before they are written so that writing the same
//! logical state twice produces the same bytes.

use async_trait::async_trait;
use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

use tether_common::crd::{ClusterPhase, Condition, TetherCluster, TetherClusterStatus};
use tether_common::{Error, FIELD_MANAGER};

/// Destination for cluster status and hub condition writes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Write import/export lists, phase and sync time of cluster `name`
    async fn write_cluster_status(&self, name: &str, status: &TetherClusterStatus)
        -> Result<(), Error>;

    /// Write the full condition list of cluster `name`
    async fn write_hub_conditions(&self, name: &str, conditions: &[Condition])
        -> Result<(), Error>;
}

/// Status sink patching the status subresource through the API server
#[derive(Clone)]
pub struct KubeStatusSink {
    api: Api<TetherCluster>,
}

impl KubeStatusSink {
    /// Sink writing TetherClusters in `namespace`
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl StatusSink for KubeStatusSink {
    async fn write_cluster_status(
        &self,
        name: &str,
        status: &TetherClusterStatus,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "status": {
                "importedFrom": status.imported_from,
                "exportedTo": status.exported_to,
                "lastSynchronizationTimestamp": status.last_synchronization_timestamp,
                "phase": status.phase,
            }
        });
        self.api
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        debug!(cluster = %name, phase = %status.phase, "Wrote cluster status");
        Ok(())
    }

    async fn write_hub_conditions(
        &self,
        name: &str,
        conditions: &[Condition],
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "status": {
                "conditions": conditions,
            }
        });
        self.api
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        debug!(cluster = %name, count = conditions.len(), "Wrote hub conditions");
        Ok(())
    }
}

/// Build the status to write from the currently cached one.
///
/// Conditions on `current` are carried over untouched.
pub fn next_cluster_status(
    current: Option<&TetherClusterStatus>,
    mut imported_from: Vec<String>,
    mut exported_to: Vec<String>,
    phase: ClusterPhase,
) -> TetherClusterStatus {
    imported_from.sort();
    exported_to.sort();

    let mut status = current.cloned().unwrap_or_default();
    status.imported_from = imported_from;
    status.exported_to = exported_to;
    status.last_synchronization_timestamp = Some(Utc::now());
    status.phase = phase;
    status
}
