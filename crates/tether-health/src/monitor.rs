//! Hub health monitor
//!
//! Every round probes each hub's tunnel endpoint and writes a `TunnelHealth`
//! condition back to the hub's status. Rounds are debounced on the monotonic
//! clock, so bursts of registry changes collapse into one round.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tether_common::crd::Condition;
use tether_common::Error;
use tether_registry::ClusterRegistry;

use crate::probe::ProbeClient;

/// Minimum spacing between two probe rounds
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Hubs the monitor probes and where their results go
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HubSource: Send + Sync {
    /// Names of every hub to probe
    async fn hubs(&self) -> Vec<String>;

    /// Address of `hub`'s tunnel endpoint, if known
    async fn tunnel_address(&self, hub: &str) -> Option<String>;

    /// Merge `conditions` into `hub`'s status
    async fn update_hub_conditions(&self, hub: &str, conditions: Vec<Condition>)
        -> Result<(), Error>;
}

#[async_trait]
impl HubSource for ClusterRegistry {
    async fn hubs(&self) -> Vec<String> {
        self.cluster_names().await
    }

    async fn tunnel_address(&self, hub: &str) -> Option<String> {
        ClusterRegistry::tunnel_address(self, hub).await
    }

    async fn update_hub_conditions(
        &self,
        hub: &str,
        conditions: Vec<Condition>,
    ) -> Result<(), Error> {
        ClusterRegistry::update_hub_conditions(self, hub, conditions).await
    }
}

/// Debounced prober of hub tunnel endpoints
pub struct HealthMonitor {
    hubs: Arc<dyn HubSource>,
    probe: Arc<dyn ProbeClient>,
    min_interval: Duration,
    last_round: Mutex<Option<Instant>>,
}

impl HealthMonitor {
    /// Monitor using [`DEFAULT_MIN_INTERVAL`]
    pub fn new(hubs: Arc<dyn HubSource>, probe: Arc<dyn ProbeClient>) -> Self {
        Self {
            hubs,
            probe,
            min_interval: DEFAULT_MIN_INTERVAL,
            last_round: Mutex::new(None),
        }
    }

    /// Override the debounce interval
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Run one probe round unless the previous one finished too recently
    ///
    /// Rounds never overlap. Failures are logged per hub and never abort the
    /// round.
    pub async fn sync(&self) {
        let mut last_round = self.last_round.lock().await;
        if let Some(finished) = *last_round {
            if finished.elapsed() < self.min_interval {
                debug!("Health sync debounced");
                return;
            }
        }

        let hubs = self.hubs.hubs().await;
        debug!(hubs = hubs.len(), "Probing hub tunnels");
        for hub in &hubs {
            let condition = match self.probe_hub(hub).await {
                Ok(()) => Condition::tunnel_healthy(),
                Err(e) => {
                    e.log(hub, "Hub tunnel probe failed");
                    Condition::tunnel_unhealthy(e.to_string())
                }
            };
            if let Err(e) = self.hubs.update_hub_conditions(hub, vec![condition]).await {
                e.log(hub, "Failed to write hub health condition");
            }
        }

        *last_round = Some(Instant::now());
    }

    async fn probe_hub(&self, hub: &str) -> Result<(), Error> {
        let address = self
            .hubs
            .tunnel_address(hub)
            .await
            .ok_or_else(|| Error::probe(hub, "no tunnel address"))?;
        self.probe.get(&format!("http://{}", address)).await
    }

    /// Call [`sync`](Self::sync) every `interval` until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken, interval: Duration) {
        info!(interval_secs = interval.as_secs(), "Starting health monitor");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.sync().await,
            }
        }
        info!("Health monitor stopped");
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}
