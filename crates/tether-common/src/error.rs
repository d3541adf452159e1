//! Error types for the Tether controller
//!
//! Errors carry the cluster or hub they concern so that a log line or a
//! caller-visible failure can be traced back without extra context.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Tether operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A cluster descriptor is not registered
    #[error("cluster {cluster:?} not found")]
    ClusterNotFound {
        /// Name of the missing cluster
        cluster: String,
    },

    /// A cluster is registered but declares no gateway address
    #[error("cluster {cluster:?} has no gateway address")]
    NoGatewayAddress {
        /// Name of the cluster without a gateway
        cluster: String,
    },

    /// The tunnel identity for a cluster could not be derived
    #[error("identity for cluster {cluster:?}: {message}")]
    Identity {
        /// Cluster whose identity secret was read
        cluster: String,
        /// Description of what failed
        message: String,
    },

    /// A remote API client could not be constructed
    #[error("failed to build client: {message}")]
    ClientBuild {
        /// Description of what failed
        message: String,
    },

    /// The mirrored service cache of a cluster failed a lifecycle call
    #[error("service cache for cluster {cluster:?}: {message}")]
    ServiceCache {
        /// Cluster owning the cache
        cluster: String,
        /// Description of what failed
        message: String,
    },

    /// No tunnel port is left in the configured range
    #[error("no free tunnel port for cluster {cluster:?} in {start}..={end}")]
    PortsExhausted {
        /// Cluster owning the port range
        cluster: String,
        /// First port of the range
        start: u16,
        /// Last port of the range
        end: u16,
    },

    /// A hub liveness probe failed
    #[error("probe of {target} failed: {message}")]
    Probe {
        /// Probed URL
        target: String,
        /// Description of what failed
        message: String,
    },

    /// Invalid input supplied by a caller
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "registry", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a cluster-not-found error
    pub fn cluster_not_found(cluster: impl Into<String>) -> Self {
        Self::ClusterNotFound {
            cluster: cluster.into(),
        }
    }

    /// Create a missing-gateway-address error
    pub fn no_gateway_address(cluster: impl Into<String>) -> Self {
        Self::NoGatewayAddress {
            cluster: cluster.into(),
        }
    }

    /// Create an identity derivation error
    pub fn identity(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Identity {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a client construction error
    pub fn client_build(msg: impl Into<String>) -> Self {
        Self::ClientBuild {
            message: msg.into(),
        }
    }

    /// Create a service cache error
    pub fn service_cache(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ServiceCache {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a probe error
    pub fn probe(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Probe {
            target: target.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Lookup and validation failures need a change in declared state before
    /// a retry can succeed. Transport and probe failures may clear on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::ClusterNotFound { .. } => false,
            Error::NoGatewayAddress { .. } => false,
            Error::Identity { .. } => true,
            Error::ClientBuild { .. } => false,
            Error::ServiceCache { .. } => true,
            Error::PortsExhausted { .. } => false,
            Error::Probe { .. } => true,
            Error::Validation { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Log a failed background step against `cluster`
    ///
    /// Retryable failures are warnings; the rest need an operator and are
    /// errors.
    pub fn log(&self, cluster: &str, what: &str) {
        if self.is_retryable() {
            tracing::warn!(cluster = %cluster, error = %self, "{}", what);
        } else {
            tracing::error!(cluster = %cluster, error = %self, "{}", what);
        }
    }
}
