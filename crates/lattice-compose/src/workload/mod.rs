//! Workload types and compilation for service groups
//!
//! This module defines the top-level pod controllers a project compiles to:
//! - Deployment: replicated, self-healing services
//! - DaemonSet: `global` services, one pod per node
//! - Pod: run-to-completion or manual-restart services
//! - ServiceAccount: emitted for the service-account-name directive
//!
//! Shared pod primitives (Container, Volume, etc.) come from `lattice_workload::k8s`.

pub mod container;
pub mod grouping;
pub mod probes;
pub mod strategy;

use std::collections::BTreeMap;

use lattice_common::kube_utils::{HasApiResource, ObjectMeta};
use lattice_workload::k8s::{Container, IntOrString, LabelSelector, PodSecurityContext, Volume};
use serde::{Deserialize, Serialize};

pub use grouping::{RestartPolicy, ServiceUnit, WorkloadGroup, WorkloadKind, WorkloadPlan};

// =============================================================================
// Deployment
// =============================================================================

/// Kubernetes Deployment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// API version
    #[serde(default = "Deployment::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Deployment::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: DeploymentSpec,
}

impl HasApiResource for Deployment {
    const API_VERSION: &'static str = "apps/v1";
    const KIND: &'static str = "Deployment";
}

impl_api_defaults!(Deployment);

impl Deployment {
    /// Create a Deployment
    pub fn new(metadata: ObjectMeta, spec: DeploymentSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// Deployment spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Number of replicas
    pub replicas: i32,
    /// Label selector
    pub selector: LabelSelector,
    /// Pod template
    pub template: PodTemplateSpec,
    /// Deployment strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<DeploymentStrategy>,
}

/// Deployment strategy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStrategy {
    /// Strategy type: RollingUpdate or Recreate
    #[serde(rename = "type")]
    pub type_: String,
    /// Rolling update config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdateConfig>,
}

/// Rolling update configuration, shared by Deployments and DaemonSets
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdateConfig {
    /// Max unavailable pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
    /// Max surge pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_surge: Option<IntOrString>,
}

// =============================================================================
// DaemonSet
// =============================================================================

/// Kubernetes DaemonSet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSet {
    /// API version
    #[serde(default = "DaemonSet::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "DaemonSet::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: DaemonSetSpec,
}

impl HasApiResource for DaemonSet {
    const API_VERSION: &'static str = "apps/v1";
    const KIND: &'static str = "DaemonSet";
}

impl_api_defaults!(DaemonSet);

impl DaemonSet {
    /// Create a DaemonSet
    pub fn new(metadata: ObjectMeta, spec: DaemonSetSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// DaemonSet spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSetSpec {
    /// Label selector
    pub selector: LabelSelector,
    /// Pod template
    pub template: PodTemplateSpec,
    /// Update strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<DeploymentStrategy>,
}

// =============================================================================
// Pod
// =============================================================================

/// Kubernetes Pod, used for services outside any replica controller
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    /// API version
    #[serde(default = "Pod::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Pod::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: PodSpec,
}

impl HasApiResource for Pod {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Pod";
}

impl_api_defaults!(Pod);

impl Pod {
    /// Create a Pod
    pub fn new(metadata: ObjectMeta, spec: PodSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// Pod template spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpec {
    /// Pod metadata
    pub metadata: PodMeta,
    /// Pod spec
    pub spec: PodSpec,
}

/// Pod metadata (subset of ObjectMeta)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodMeta {
    /// Labels
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Pod spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Service account name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Containers
    pub containers: Vec<Container>,
    /// Init containers (run before main containers, or alongside as sidecars)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    /// Volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    /// Pod-level security context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,
    /// Restart policy (Always, OnFailure, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
}

impl PodSpec {
    /// Add an app container unless one with the same name is present.
    ///
    /// Returns the index of the container.
    pub fn add_container(&mut self, container: Container) -> usize {
        add_unique(&mut self.containers, container)
    }

    /// Add an init container unless one with the same name is present.
    pub fn add_init_container(&mut self, container: Container) -> usize {
        add_unique(&mut self.init_containers, container)
    }

    /// Drop repeated (name, path) mounts in every container
    pub fn dedup_mounts(&mut self) {
        for c in self
            .containers
            .iter_mut()
            .chain(self.init_containers.iter_mut())
        {
            lattice_workload::dedup_volume_mounts(&mut c.volume_mounts);
        }
    }

    /// Merge supplemental groups, keeping them sorted and unique
    pub fn add_supplemental_groups(&mut self, groups: &[i64]) {
        if groups.is_empty() {
            return;
        }
        let ctx = self.security_context.get_or_insert_with(Default::default);
        ctx.supplemental_groups.extend_from_slice(groups);
        ctx.supplemental_groups.sort_unstable();
        ctx.supplemental_groups.dedup();
    }
}

fn add_unique(containers: &mut Vec<Container>, container: Container) -> usize {
    if let Some(idx) = containers.iter().position(|c| c.name == container.name) {
        return idx;
    }
    containers.push(container);
    containers.len() - 1
}

// =============================================================================
// ServiceAccount
// =============================================================================

/// Kubernetes ServiceAccount
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    /// API version
    #[serde(default = "ServiceAccount::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "ServiceAccount::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
}

impl HasApiResource for ServiceAccount {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "ServiceAccount";
}

impl_api_defaults!(ServiceAccount);

impl ServiceAccount {
    /// Create a ServiceAccount
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_workload::k8s::VolumeMount;

    fn container(name: &str) -> Container {
        Container {
            name: name.to_string(),
            image: "busybox".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn story_same_container_is_not_added_twice() {
        let mut spec = PodSpec::default();
        assert_eq!(spec.add_container(container("web")), 0);
        assert_eq!(spec.add_container(container("worker")), 1);
        assert_eq!(spec.add_container(container("web")), 0);
        assert_eq!(spec.containers.len(), 2);
    }

    #[test]
    fn dedup_mounts_covers_init_containers() {
        let mut spec = PodSpec::default();
        let mut init = container("migrate");
        init.volume_mounts = vec![
            VolumeMount::new("data", "/data"),
            VolumeMount::new("data", "/data"),
        ];
        spec.add_init_container(init);
        spec.dedup_mounts();
        assert_eq!(spec.init_containers[0].volume_mounts.len(), 1);
    }

    #[test]
    fn supplemental_groups_sorted_unique() {
        let mut spec = PodSpec::default();
        spec.add_supplemental_groups(&[3000, 1000]);
        spec.add_supplemental_groups(&[1000]);
        assert_eq!(
            spec.security_context.unwrap().supplemental_groups,
            vec![1000, 3000]
        );
    }

    #[test]
    fn deployment_serializes_api_version_and_kind() {
        let d = Deployment::new(
            ObjectMeta::new("web"),
            DeploymentSpec {
                replicas: 2,
                selector: LabelSelector::default(),
                template: PodTemplateSpec {
                    metadata: PodMeta::default(),
                    spec: PodSpec::default(),
                },
                strategy: None,
            },
        );
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["apiVersion"], "apps/v1");
        assert_eq!(json["kind"], "Deployment");
        assert_eq!(json["spec"]["replicas"], 2);
        assert!(json["spec"].get("strategy").is_none());
    }
}
