//! Shared Kubernetes client construction
//!
//! Every client built here gets explicit connect/read timeouts so that a
//! dead remote API server surfaces as an error instead of a hang.

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Server-side watch timeout in seconds, kept below [`DEFAULT_READ_TIMEOUT`]
/// so the API server closes idle watches before the client read times out
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Read and merge a kubeconfig path list
///
/// `paths` uses the platform separator like `KUBECONFIG` does. Empty entries
/// are skipped and the first file to set a key wins.
pub fn load_kubeconfig(paths: &Path) -> Result<Kubeconfig, Error> {
    let mut merged: Option<Kubeconfig> = None;
    for path in std::env::split_paths(paths.as_os_str()) {
        if path.as_os_str().is_empty() {
            continue;
        }
        let next = Kubeconfig::read_from(&path).map_err(|e| {
            Error::client_build(format!(
                "failed to read kubeconfig {}: {}",
                path.display(),
                e
            ))
        })?;
        merged = Some(match merged {
            Some(current) => current
                .merge(next)
                .map_err(|e| Error::client_build(format!("failed to merge kubeconfig: {}", e)))?,
            None => next,
        });
    }
    merged.ok_or_else(|| Error::client_build("kubeconfig path list is empty"))
}

/// Create a kube client from optional kubeconfig path list with default timeouts
///
/// Falls back to in-cluster / environment inference when no path is given.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let config = match kubeconfig {
        Some(paths) => {
            let kubeconfig = load_kubeconfig(paths)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::client_build(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::client_build(format!("failed to infer config: {}", e)))?,
    };
    client_with_timeouts(config, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
}

/// Create a kube client from raw kubeconfig YAML bytes
///
/// Used for remote clusters whose kubeconfig travels inside a CRD.
pub async fn client_from_kubeconfig_bytes(
    kubeconfig: &[u8],
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    if kubeconfig.is_empty() {
        return Err(Error::client_build("kubeconfig is empty"));
    }
    let text = std::str::from_utf8(kubeconfig)
        .map_err(|e| Error::client_build(format!("kubeconfig is not UTF-8: {}", e)))?;
    let kubeconfig = Kubeconfig::from_yaml(text)
        .map_err(|e| Error::client_build(format!("failed to parse kubeconfig: {}", e)))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::client_build(format!("failed to load kubeconfig: {}", e)))?;
    client_with_timeouts(config, connect_timeout, read_timeout)
}

fn client_with_timeouts(
    mut config: Config,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config)
        .map_err(|e| Error::client_build(format!("failed to create client: {}", e)))
}
