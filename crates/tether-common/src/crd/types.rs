//! Shared status types used by Tether CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type written by the hub health monitor
pub const TUNNEL_HEALTH_CONDITION: &str = "TunnelHealth";

/// Reason used when a hub's tunnel answered its liveness probe
pub const REASON_HEALTHY: &str = "Healthy";

/// Reason used when a hub's tunnel could not be probed
pub const REASON_UNHEALTHY: &str = "Unhealthy";

/// Synchronization phase of a remote cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ClusterPhase {
    /// Registered, nothing imported or exported yet
    #[default]
    Pending,
    /// Routes to and from the cluster are in place
    Ready,
    /// The last synchronization attempt failed
    Failed,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., TunnelHealth)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Tunnel health condition for a hub that answered its probe
    pub fn tunnel_healthy() -> Self {
        Self::new(
            TUNNEL_HEALTH_CONDITION,
            ConditionStatus::True,
            REASON_HEALTHY,
            "",
        )
    }

    /// Tunnel health condition for a hub whose probe failed
    pub fn tunnel_unhealthy(message: impl Into<String>) -> Self {
        Self::new(
            TUNNEL_HEALTH_CONDITION,
            ConditionStatus::False,
            REASON_UNHEALTHY,
            message,
        )
    }
}

/// Insert or replace `condition` in `conditions`, keyed by type.
///
/// When a condition of the same type already exists with the same status,
/// its transition time is kept so that repeated identical probes do not
/// churn the timestamp.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn phase_display_matches_serialized_form() {
        for phase in [ClusterPhase::Pending, ClusterPhase::Ready, ClusterPhase::Failed] {
            let json = serde_json::to_value(phase).expect("serialize");
            assert_eq!(json, serde_json::json!(phase.to_string()));
        }
    }

    #[test]
    fn condition_serializes_kubernetes_field_names() {
        let cond = Condition::tunnel_unhealthy("connection refused");
        let json = serde_json::to_value(&cond).expect("serialize");
        assert_eq!(json["type"], "TunnelHealth");
        assert_eq!(json["status"], "False");
        assert_eq!(json["reason"], "Unhealthy");
        assert_eq!(json["message"], "connection refused");
        assert!(json.get("lastTransitionTime").is_some());
    }

    #[test]
    fn set_condition_appends_new_types() {
        let mut conditions = vec![Condition::new("Other", ConditionStatus::True, "Ok", "")];
        set_condition(&mut conditions, Condition::tunnel_healthy());
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[1].type_, TUNNEL_HEALTH_CONDITION);
    }

    #[test]
    fn set_condition_keeps_transition_time_when_status_unchanged() {
        let mut first = Condition::tunnel_healthy();
        first.last_transition_time = at(100);
        let mut conditions = vec![first];

        let mut again = Condition::tunnel_healthy();
        again.last_transition_time = at(200);
        set_condition(&mut conditions, again);

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, at(100));
    }

    #[test]
    fn set_condition_moves_transition_time_on_status_change() {
        let mut first = Condition::tunnel_healthy();
        first.last_transition_time = at(100);
        let mut conditions = vec![first];

        let mut failed = Condition::tunnel_unhealthy("timeout");
        failed.last_transition_time = at(200);
        set_condition(&mut conditions, failed);

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert_eq!(conditions[0].message, "timeout");
        assert_eq!(conditions[0].last_transition_time, at(200));
    }
}
