//! Remote cluster API clients
//!
//! The registry owns exactly one [`RemoteClient`] per cluster. Handles are
//! cheap to clone and compare by identity, so callers can tell whether a
//! client was rebuilt between two reads.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::Client;

use tether_common::kube_utils::{
    client_from_kubeconfig_bytes, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT,
};
use tether_common::Error;

/// Shared handle to a remote cluster's API client
#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<Client>,
}

impl RemoteClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self {
            inner: Arc::new(client),
        }
    }

    /// The underlying kube client
    pub fn kube(&self) -> &Client {
        &self.inner
    }

    /// True when both handles come from the same construction
    pub fn ptr_eq(&self, other: &RemoteClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("handle", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

/// Builds remote clients from raw kubeconfig bytes
///
/// Construction either yields a usable handle or an explicit error, never a
/// half-initialized client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteClientFactory: Send + Sync {
    /// Build a client for the cluster described by `kubeconfig`
    async fn build(&self, kubeconfig: &[u8]) -> Result<RemoteClient, Error>;
}

/// Default factory that parses kubeconfig YAML
#[derive(Clone, Debug)]
pub struct KubeconfigClientFactory {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl KubeconfigClientFactory {
    /// Factory with custom timeouts
    pub fn with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }
}

impl Default for KubeconfigClientFactory {
    fn default() -> Self {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }
}

#[async_trait]
impl RemoteClientFactory for KubeconfigClientFactory {
    async fn build(&self, kubeconfig: &[u8]) -> Result<RemoteClient, Error> {
        let client =
            client_from_kubeconfig_bytes(kubeconfig, self.connect_timeout, self.read_timeout)
                .await?;
        Ok(RemoteClient::new(client))
    }
}

/// A client backed by a mock service that nothing answers.
#[cfg(test)]
pub(crate) fn inert_client() -> RemoteClient {
    let (service, _handle) = tower_test::mock::pair::<
        http::Request<kube::client::Body>,
        http::Response<kube::client::Body>,
    >();
    RemoteClient::new(Client::new(service, "default"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_identity() {
        let a = inert_client();
        let b = a.clone();
        let c = inert_client();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }

    #[tokio::test]
    async fn default_factory_rejects_empty_kubeconfig() {
        let factory = KubeconfigClientFactory::default();
        let err = factory.build(b"").await.unwrap_err();
        assert!(matches!(err, Error::ClientBuild { .. }));
    }
}
