//! TetherCluster CRD describing how to reach a remote cluster
//!
//! A TetherCluster carries the credentials needed to talk to a remote
//! cluster's API server and the gateway through which tunnels reach it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::types::{ClusterPhase, Condition};

/// TetherCluster declares a remote cluster taking part in the tunnel mesh.
///
/// Example:
/// ```yaml
/// apiVersion: tether.dev/v1alpha1
/// kind: TetherCluster
/// metadata:
///   name: east
///   namespace: tether-system
/// spec:
///   kubeconfig: YXBpVmVyc2lvbjogdjEK
///   gateway:
///     address: 10.0.0.1:443
///     navigation:
///       - clusterName: hub
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tether.dev",
    version = "v1alpha1",
    kind = "TetherCluster",
    namespaced,
    status = "TetherClusterStatus",
    shortname = "tc",
    printcolumn = r#"{"name":"Gateway","type":"string","jsonPath":".spec.gateway.address"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TetherClusterSpec {
    /// Kubeconfig for the remote cluster's API server (base64 in JSON)
    ///
    /// Compared as a whole: any byte difference rebuilds the remote client.
    #[serde(
        default,
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    #[schemars(with = "String")]
    pub kubeconfig: Vec<u8>,

    /// How other clusters reach this one
    #[serde(default)]
    pub gateway: GatewaySpec,
}

/// Gateway configuration of a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Address of the cluster's tunnel gateway (`host:port`)
    ///
    /// Empty means the cluster has no directly reachable gateway.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,

    /// Hops used when this cluster dials out to others
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub navigation: Vec<GatewayWay>,

    /// Hops used when others dial in to this cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reception: Vec<GatewayWay>,
}

/// One hop of a tunnel path
///
/// Either a literal proxy URI or a reference to a cluster whose gateway
/// should be dialled.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayWay {
    /// Literal proxy URI, used verbatim when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Name of the TetherCluster to dial through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
}

impl GatewayWay {
    /// A hop through a literal proxy URI
    pub fn via_proxy(proxy: impl Into<String>) -> Self {
        Self {
            proxy: Some(proxy.into()),
            cluster_name: None,
        }
    }

    /// A hop through another cluster's gateway
    pub fn via_cluster(name: impl Into<String>) -> Self {
        Self {
            proxy: None,
            cluster_name: Some(name.into()),
        }
    }

    /// The literal proxy, if one is set and non-empty
    pub fn override_proxy(&self) -> Option<&str> {
        self.proxy.as_deref().filter(|p| !p.is_empty())
    }
}

/// TetherCluster status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TetherClusterStatus {
    /// Clusters this cluster imports services from (sorted)
    #[serde(default)]
    pub imported_from: Vec<String>,

    /// Clusters this cluster exports services to (sorted)
    #[serde(default)]
    pub exported_to: Vec<String>,

    /// Last time import/export state was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synchronization_timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// Current phase
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Conditions such as tunnel health
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn parses_manifest_and_decodes_kubeconfig() {
        let yaml = r#"
apiVersion: tether.dev/v1alpha1
kind: TetherCluster
metadata:
  name: east
  namespace: tether-system
spec:
  kubeconfig: YXBpVmVyc2lvbjogdjEK
  gateway:
    address: 10.0.0.1:443
    navigation:
      - clusterName: hub
      - proxy: socks5://corp-proxy:1080
"#;
        let cluster: TetherCluster = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(cluster.spec.kubeconfig, b"apiVersion: v1\n");
        assert_eq!(cluster.spec.gateway.address, "10.0.0.1:443");
        assert_eq!(
            cluster.spec.gateway.navigation,
            vec![
                GatewayWay::via_cluster("hub"),
                GatewayWay::via_proxy("socks5://corp-proxy:1080"),
            ]
        );
        assert!(cluster.spec.gateway.reception.is_empty());
        assert!(cluster.status.is_none());
    }

    #[test]
    fn kubeconfig_serializes_as_base64() {
        let spec = TetherClusterSpec {
            kubeconfig: b"apiVersion: v1\n".to_vec(),
            gateway: GatewaySpec::default(),
        };
        let json = serde_json::to_value(&spec).expect("serialize");
        assert_eq!(json["kubeconfig"], "YXBpVmVyc2lvbjogdjEK");
    }

    #[test]
    fn invalid_base64_kubeconfig_is_rejected() {
        let json = serde_json::json!({ "kubeconfig": "not base64!!" });
        assert!(serde_json::from_value::<TetherClusterSpec>(json).is_err());
    }

    #[test]
    fn empty_proxy_is_not_an_override() {
        let way = GatewayWay {
            proxy: Some(String::new()),
            cluster_name: Some("hub".to_string()),
        };
        assert_eq!(way.override_proxy(), None);
        assert_eq!(
            GatewayWay::via_proxy("ssh://a").override_proxy(),
            Some("ssh://a")
        );
    }

    #[test]
    fn status_defaults_to_pending() {
        let status: TetherClusterStatus =
            serde_json::from_value(serde_json::json!({})).expect("parse");
        assert_eq!(status.phase, ClusterPhase::Pending);
        assert!(status.imported_from.is_empty());
        assert!(status.last_synchronization_timestamp.is_none());
    }

    #[test]
    fn crd_is_namespaced_with_status_subresource() {
        let crd = TetherCluster::crd();
        assert_eq!(crd.spec.group, "tether.dev");
        assert_eq!(crd.spec.scope, "Namespaced");
        let version = &crd.spec.versions[0];
        assert!(version
            .subresources
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .is_some());
    }
}
