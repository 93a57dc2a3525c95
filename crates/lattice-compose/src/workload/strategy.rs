//! Rollout strategy from `deploy.update_config`
//!
//! `parallelism` (default 1) is the unit for surge and unavailability.

use lattice_workload::k8s::IntOrString;

use crate::project::UpdateConfig;

use super::{DeploymentStrategy, RollingUpdateConfig};

/// Surge used by Deployments without an explicit order
pub const DEFAULT_MAX_SURGE: &str = "25%";

/// Update order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOrder {
    /// Tear down before starting replacements
    StopFirst,
    /// Start replacements before tearing down
    StartFirst,
    /// Rolling update with modest surge
    Default,
}

impl UpdateOrder {
    fn from_config(config: Option<&UpdateConfig>) -> Self {
        match config.and_then(|c| c.order.as_deref()) {
            Some("stop-first") => UpdateOrder::StopFirst,
            Some("start-first") => UpdateOrder::StartFirst,
            _ => UpdateOrder::Default,
        }
    }
}

fn parallelism(config: Option<&UpdateConfig>) -> i32 {
    config
        .and_then(|c| c.parallelism)
        .filter(|p| *p > 0)
        .unwrap_or(1)
}

fn rolling(max_surge: IntOrString, max_unavailable: IntOrString) -> DeploymentStrategy {
    DeploymentStrategy {
        type_: "RollingUpdate".to_string(),
        rolling_update: Some(RollingUpdateConfig {
            max_surge: Some(max_surge),
            max_unavailable: Some(max_unavailable),
        }),
    }
}

/// Strategy for a Deployment
pub fn deployment_strategy(config: Option<&UpdateConfig>) -> DeploymentStrategy {
    let unit = parallelism(config);
    match UpdateOrder::from_config(config) {
        UpdateOrder::StopFirst => DeploymentStrategy {
            type_: "Recreate".to_string(),
            rolling_update: None,
        },
        UpdateOrder::StartFirst => rolling(IntOrString::Int(unit), IntOrString::Int(0)),
        UpdateOrder::Default => rolling(DEFAULT_MAX_SURGE.into(), IntOrString::Int(unit)),
    }
}

/// Update strategy for a DaemonSet (which has no Recreate)
pub fn daemon_set_strategy(config: Option<&UpdateConfig>) -> DeploymentStrategy {
    let unit = parallelism(config);
    match UpdateOrder::from_config(config) {
        UpdateOrder::StartFirst => rolling(IntOrString::Int(unit), IntOrString::Int(0)),
        UpdateOrder::StopFirst | UpdateOrder::Default => {
            rolling(IntOrString::Int(0), IntOrString::Int(unit))
        }
    }
}
