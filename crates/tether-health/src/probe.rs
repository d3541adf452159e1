//! HTTP liveness probe against a hub's tunnel endpoint

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use tether_common::Error;

/// Default timeout of one probe request
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Performs a single liveness request
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProbeClient: Send + Sync {
    /// GET `base_url`; any transport failure or non-2xx answer is an error
    async fn get(&self, base_url: &str) -> Result<(), Error>;
}

/// Probe client backed by `reqwest`
#[derive(Clone, Debug)]
pub struct HttpProbeClient {
    client: reqwest::Client,
}

impl HttpProbeClient {
    /// Client with [`DEFAULT_PROBE_TIMEOUT`]
    pub fn new() -> Result<Self, Error> {
        Self::with_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    /// Client whose requests give up after `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal_with_context("HttpProbeClient", e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProbeClient for HttpProbeClient {
    async fn get(&self, base_url: &str) -> Result<(), Error> {
        let response = self
            .client
            .get(base_url)
            .send()
            .await
            .map_err(|e| Error::probe(base_url, format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::probe(base_url, format!("HTTP {}", status)));
        }
        debug!(target_url = %base_url, status = %status, "Probe succeeded");
        Ok(())
    }
}
