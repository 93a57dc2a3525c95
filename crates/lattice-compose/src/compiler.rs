//! Project compiler
//!
//! Orchestrates one conversion:
//! 1. Secrets, configs and volumes are materialized before any service, so
//!    every reference to the same artifact resolves to the same name
//! 2. Services are classified into groups and standalone pods
//! 3. Each group becomes a Deployment or DaemonSet (sorted by key), each
//!    standalone service a Pod, both followed by network exposure
//!
//! The result is a [`Resources`] collection whose iteration order does not
//! depend on the order anything was inserted.

use std::collections::BTreeMap;

use lattice_common::LABEL_NAME;
use lattice_workload::k8s::{Container, LabelSelector};
use lattice_workload::sanitize_dns_label;
use tracing::debug;

use crate::annotations::{self, without_directives};
use crate::configs::ConfigMaterializer;
use crate::error::Result;
use crate::mounts::MountResolver;
use crate::network::NetworkCompiler;
use crate::options::ConvertOptions;
use crate::project::{Project, UpdateConfig};
use crate::resources::Resources;
use crate::secrets::SecretMaterializer;
use crate::volumes::VolumeCompiler;
use crate::workload::container::{supplemental_groups, ContainerCompiler};
use crate::workload::strategy::{daemon_set_strategy, deployment_strategy};
use crate::workload::{
    DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec, Pod, PodMeta, PodSpec, PodTemplateSpec,
    ServiceAccount, ServiceUnit, WorkloadGroup, WorkloadKind, WorkloadPlan,
};

/// Convert a project into Kubernetes objects.
///
/// Fails on the first fatal problem (bad directive, unreadable file, missing
/// environment variable, invalid size); unresolvable mounts are only
/// recorded in [`Resources::diagnostics`].
pub fn convert(project: &Project, options: &ConvertOptions) -> Result<Resources> {
    ProjectCompiler::new(project, options).compile()
}

/// Compiler for a whole project
pub struct ProjectCompiler<'a> {
    project: &'a Project,
    options: &'a ConvertOptions,
}

impl<'a> ProjectCompiler<'a> {
    /// Create a compiler for `project`
    pub fn new(project: &'a Project, options: &'a ConvertOptions) -> Self {
        Self { project, options }
    }

    /// Run the conversion
    pub fn compile(&self) -> Result<Resources> {
        let mut resources = Resources::default();

        let secrets = SecretMaterializer::materialize(self.project, self.options, &mut resources)?;
        let configs = ConfigMaterializer::materialize(self.project, self.options, &mut resources)?;
        let volumes = VolumeCompiler::materialize(self.project, self.options, &mut resources)?;
        let mounts = MountResolver::new(self.project, self.options, &secrets, &configs, &volumes);

        let plan = WorkloadPlan::build(self.project)?;
        for group in plan.groups.values() {
            self.compile_group(group, &mounts, &mut resources)?;
        }
        for unit in &plan.standalone {
            self.compile_standalone(unit, &mounts, &mut resources)?;
        }

        debug!(
            objects = resources.len(),
            diagnostics = resources.diagnostics().len(),
            "conversion complete"
        );
        Ok(resources)
    }

    fn compile_group(
        &self,
        group: &WorkloadGroup<'_>,
        mounts: &MountResolver<'_>,
        resources: &mut Resources,
    ) -> Result<()> {
        let name = sanitize_dns_label(&group.key);
        let selector = selector_labels(&name, &group.app)?;

        let mut spec = PodSpec::default();
        for unit in &group.app {
            let container = self.compile_container(unit, mounts, &mut spec, resources)?;
            spec.add_container(container);
        }
        for unit in &group.init {
            let container = self.compile_container(unit, mounts, &mut spec, resources)?;
            spec.add_init_container(container);
        }
        self.attach_service_account(group.members(), &mut spec, resources);
        // merged services can repeat a (volume, path) pair
        spec.dedup_mounts();

        let metadata = self.workload_meta(&name, &selector, group.members());
        let template = PodTemplateSpec {
            metadata: PodMeta {
                labels: selector.clone(),
                annotations: BTreeMap::new(),
            },
            spec,
        };
        let update_config = first_update_config(&group.app);
        let match_labels = LabelSelector {
            match_labels: selector.clone(),
        };

        let kind = group.kind();
        match kind {
            WorkloadKind::Deployment => {
                resources.insert(Deployment::new(
                    metadata,
                    DeploymentSpec {
                        replicas: group.replicas(),
                        selector: match_labels,
                        template,
                        strategy: Some(deployment_strategy(update_config)),
                    },
                ));
            }
            WorkloadKind::DaemonSet => {
                resources.insert(DaemonSet::new(
                    metadata,
                    DaemonSetSpec {
                        selector: match_labels,
                        template,
                        update_strategy: Some(daemon_set_strategy(update_config)),
                    },
                ));
            }
        }
        debug!(group = %group.key, kind = ?kind, app = group.app.len(), init = group.init.len(), "compiled group");

        NetworkCompiler::compile(
            &name,
            &selector,
            group.app.iter().map(|u| (u.name, u.config)),
            self.options,
            resources,
        );
        Ok(())
    }

    fn compile_standalone(
        &self,
        unit: &ServiceUnit<'_>,
        mounts: &MountResolver<'_>,
        resources: &mut Resources,
    ) -> Result<()> {
        let name = sanitize_dns_label(unit.name);
        let selector = selector_labels(&name, std::slice::from_ref(unit))?;

        let mut spec = PodSpec {
            restart_policy: Some(unit.restart.as_str().to_string()),
            ..Default::default()
        };
        let container = self.compile_container(unit, mounts, &mut spec, resources)?;
        spec.add_container(container);
        self.attach_service_account(std::iter::once(unit), &mut spec, resources);
        spec.dedup_mounts();

        let metadata = self.workload_meta(&name, &selector, std::iter::once(unit));
        resources.insert(Pod::new(metadata, spec));
        debug!(service = %unit.name, restart = unit.restart.as_str(), "compiled standalone pod");

        NetworkCompiler::compile(
            &name,
            &selector,
            std::iter::once((unit.name, unit.config)),
            self.options,
            resources,
        );
        Ok(())
    }

    /// Container with its mounts resolved into `spec`
    fn compile_container(
        &self,
        unit: &ServiceUnit<'_>,
        mounts: &MountResolver<'_>,
        spec: &mut PodSpec,
        resources: &mut Resources,
    ) -> Result<Container> {
        let mut container = ContainerCompiler::compile(unit)?;
        mounts.resolve(unit, &mut spec.volumes, &mut container, resources)?;
        spec.add_supplemental_groups(&supplemental_groups(unit.name, &unit.config.group_add));
        Ok(container)
    }

    /// First service-account directive among `members` wins
    fn attach_service_account<'u, 's: 'u>(
        &self,
        members: impl IntoIterator<Item = &'u ServiceUnit<'s>>,
        spec: &mut PodSpec,
        resources: &mut Resources,
    ) {
        let Some(account) = members
            .into_iter()
            .find_map(|u| u.directives.get(annotations::SERVICE_ACCOUNT_NAME))
        else {
            return;
        };
        spec.service_account_name = Some(account.to_string());
        resources.insert(ServiceAccount::new(self.options.object_meta(account)));
    }

    /// Workload metadata: stamped options, selector labels and the members'
    /// non-directive labels and annotations (first member wins on conflicts)
    fn workload_meta<'u, 's: 'u>(
        &self,
        name: &str,
        selector: &BTreeMap<String, String>,
        members: impl IntoIterator<Item = &'u ServiceUnit<'s>>,
    ) -> lattice_common::ObjectMeta {
        let mut labels = BTreeMap::new();
        let mut annotations = BTreeMap::new();
        for unit in members {
            for (k, v) in without_directives(&unit.config.labels) {
                labels.entry(k).or_insert(v);
            }
            for (k, v) in without_directives(&unit.config.annotations) {
                annotations.entry(k).or_insert(v);
            }
        }
        self.options
            .object_meta(name)
            .with_labels(&labels)
            .with_annotations(&annotations)
            .with_labels(selector)
    }
}

/// Selector from the first app service declaring selector-match-labels, else the workload name
fn selector_labels(name: &str, app: &[ServiceUnit<'_>]) -> Result<BTreeMap<String, String>> {
    for unit in app {
        if let Some(labels) = unit.directives.string_map(annotations::SELECTOR_MATCH_LABELS)? {
            if !labels.is_empty() {
                return Ok(labels);
            }
        }
    }
    Ok(BTreeMap::from([(LABEL_NAME.to_string(), name.to_string())]))
}

fn first_update_config<'a>(app: &[ServiceUnit<'a>]) -> Option<&'a UpdateConfig> {
    app.iter()
        .find_map(|u| u.config.deploy.as_ref().and_then(|d| d.update_config.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConversionError;
    use crate::resources::ResourceKind;

    fn convert_yaml(yaml: &str) -> Resources {
        convert(&Project::from_yaml(yaml).unwrap(), &ConvertOptions::default()).unwrap()
    }

    #[test]
    fn story_group_merges_app_and_init_members() {
        let resources = convert_yaml(
            r#"
services:
  server:
    image: api
    ports: ["8080:80"]
    volumes: ["data:/data"]
    labels:
      lattice.dev/group: api
      tier: backend
  worker:
    image: api
    volumes: ["data:/data"]
    labels:
      lattice.dev/group: api
  migrate:
    image: migrate
    volumes: ["data:/data", "data:/data"]
    labels:
      lattice.dev/group: api
      lattice.dev/container-type: init
volumes:
  data: {}
"#,
        );
        assert_eq!(resources.count(ResourceKind::Deployment), 1);
        let deployment = resources.deployments().next().unwrap();
        assert_eq!(deployment.metadata.name, "api");
        assert_eq!(deployment.metadata.labels["tier"], "backend");
        assert_eq!(deployment.metadata.labels[LABEL_NAME], "api");
        assert!(!deployment.metadata.labels.contains_key(annotations::GROUP));

        let spec = &deployment.spec.template.spec;
        let names: Vec<&str> = spec.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["server", "worker"]);
        assert_eq!(spec.init_containers.len(), 1);
        assert_eq!(spec.init_containers[0].volume_mounts.len(), 1);
        assert_eq!(spec.volumes.len(), 1);
        assert_eq!(deployment.spec.selector.match_labels, deployment.spec.template.metadata.labels);

        let service = resources.services().next().unwrap();
        assert_eq!(service.metadata.name, "api");
        assert_eq!(service.spec.selector, deployment.spec.selector.match_labels);
    }

    #[test]
    fn story_selector_directive_and_service_account() {
        let resources = convert_yaml(
            r#"
services:
  web:
    image: web
    ports: ["80"]
    annotations:
      lattice.dev/selector-match-labels: '{"app": "frontend"}'
      lattice.dev/service-account-name: web-runner
"#,
        );
        let deployment = resources.deployments().next().unwrap();
        assert_eq!(
            deployment.spec.selector.match_labels,
            BTreeMap::from([("app".to_string(), "frontend".to_string())])
        );
        assert_eq!(deployment.metadata.labels["app"], "frontend");
        assert_eq!(
            deployment.spec.template.spec.service_account_name.as_deref(),
            Some("web-runner")
        );
        assert!(resources.contains(ResourceKind::ServiceAccount, "web-runner"));
        assert_eq!(
            resources.services().next().unwrap().spec.selector["app"],
            "frontend"
        );
    }

    #[test]
    fn story_standalone_pod_carries_restart_policy() {
        let resources = convert_yaml(
            r#"
services:
  backup:
    image: backup
    restart: on-failure:3
    group_add: ["20", "10"]
"#,
        );
        assert!(resources.deployments().next().is_none());
        let pod = resources.pods().next().unwrap();
        assert_eq!(pod.spec.restart_policy.as_deref(), Some("OnFailure"));
        assert_eq!(pod.metadata.labels[LABEL_NAME], "backup");
        assert_eq!(
            pod.spec.security_context.as_ref().unwrap().supplemental_groups,
            vec![10, 20]
        );
        assert_eq!(resources.services().count(), 0);
    }

    #[test]
    fn story_update_config_drives_strategy() {
        let resources = convert_yaml(
            r#"
services:
  web:
    image: web
    deploy:
      replicas: 4
      update_config:
        order: stop-first
"#,
        );
        let deployment = resources.deployments().next().unwrap();
        assert_eq!(deployment.spec.replicas, 4);
        assert_eq!(deployment.spec.strategy.as_ref().unwrap().type_, "Recreate");
    }

    #[test]
    fn invalid_selector_directive_is_fatal() {
        let project = Project::from_yaml(
            r#"
services:
  web:
    image: web
    labels:
      lattice.dev/selector-match-labels: not-json
"#,
        )
        .unwrap();
        let err = convert(&project, &ConvertOptions::default()).unwrap_err();
        assert!(matches!(err, ConversionError::Configuration { .. }));
    }
}
