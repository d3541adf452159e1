//! Tunnel identity derivation
//!
//! Each cluster has a Secret of the same name whose `identity` key holds the
//! raw credential used when dialling its gateway. The token handed to tunnel
//! URIs is that value in URL-safe base64.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};

use tether_common::{Error, IDENTITY_SECRET_KEY};

/// Read access to the secrets backing cluster identities
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the data of secret `name`, or `None` if it does not exist
    async fn get(&self, name: &str) -> Result<Option<BTreeMap<String, Vec<u8>>>, Error>;
}

/// Secret store backed by Kubernetes Secrets in one namespace
#[derive(Clone)]
pub struct KubeSecretStore {
    api: Api<Secret>,
}

impl KubeSecretStore {
    /// Store reading secrets from `namespace`
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, name: &str) -> Result<Option<BTreeMap<String, Vec<u8>>>, Error> {
        let secret = self.api.get_opt(name).await?;
        Ok(secret.map(|s| {
            s.data
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, v.0))
                .collect()
        }))
    }
}

/// Derive the transport identity token for `cluster`.
///
/// A missing secret, an empty secret, or a missing/empty `identity` key are
/// all reported as [`Error::Identity`].
pub async fn derive_identity_token(store: &dyn SecretStore, cluster: &str) -> Result<String, Error> {
    let data = store
        .get(cluster)
        .await?
        .ok_or_else(|| Error::identity(cluster, format!("secret {:?} not found", cluster)))?;
    if data.is_empty() {
        return Err(Error::identity(
            cluster,
            format!("secret {:?} is empty", cluster),
        ));
    }
    let identity = data
        .get(IDENTITY_SECRET_KEY)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            Error::identity(
                cluster,
                format!("secret {:?} has no {} key", cluster, IDENTITY_SECRET_KEY),
            )
        })?;
    Ok(URL_SAFE.encode(identity))
}
