//! Custom Resource Definitions for Tether
//!
//! This module contains all CRD definitions used by the Tether controller.

mod cluster;
mod types;

pub use cluster::{GatewaySpec, GatewayWay, TetherCluster, TetherClusterSpec, TetherClusterStatus};
pub use types::{
    set_condition, ClusterPhase, Condition, ConditionStatus, REASON_HEALTHY, REASON_UNHEALTHY,
    TUNNEL_HEALTH_CONDITION,
};
