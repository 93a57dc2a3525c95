//! Service classification and grouping
//!
//! Every service is evaluated once:
//! 1. Resolve its effective restart policy.
//! 2. App-role services that do not restart `Always` become standalone Pods.
//! 3. Everything else joins a group (explicit `group` directive, else its own
//!    name) as an app-role or init-role member.
//!
//! Groups and standalone services share one object namespace once their names
//! are reduced to DNS labels; two owners of the same label are rejected.

use std::collections::BTreeMap;

use lattice_workload::sanitize_dns_label;
use tracing::{debug, warn};

use crate::annotations::{self, Directives};
use crate::error::{ConversionError, Result};
use crate::project::{Project, ServiceConfig};

/// Pod restart policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Restart whenever the container exits
    Always,
    /// Restart on non-zero exit
    OnFailure,
    /// Never restart
    Never,
}

impl RestartPolicy {
    /// Kubernetes spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::Always => "Always",
            RestartPolicy::OnFailure => "OnFailure",
            RestartPolicy::Never => "Never",
        }
    }

    /// Map a deploy `restart_policy.condition`
    pub fn from_condition(condition: &str) -> Option<Self> {
        match condition {
            "any" => Some(RestartPolicy::Always),
            "on-failure" => Some(RestartPolicy::OnFailure),
            "none" => Some(RestartPolicy::Never),
            _ => None,
        }
    }

    /// Map a compose `restart` string
    pub fn from_compose(restart: &str) -> Option<Self> {
        match restart {
            "always" | "unless-stopped" => Some(RestartPolicy::Always),
            "no" => Some(RestartPolicy::Never),
            r if r == "on-failure" || r.starts_with("on-failure:") => Some(RestartPolicy::OnFailure),
            _ => None,
        }
    }
}

/// Effective restart policy: deploy condition, then compose restart, then role default
pub fn effective_restart_policy(name: &str, service: &ServiceConfig, init: bool) -> RestartPolicy {
    let condition = service
        .deploy
        .as_ref()
        .and_then(|d| d.restart_policy.as_ref())
        .and_then(|r| r.condition.as_deref())
        .filter(|c| !c.is_empty());
    if let Some(condition) = condition {
        match RestartPolicy::from_condition(condition) {
            Some(policy) => return policy,
            None => warn!(service = %name, condition = %condition, "unknown restart condition ignored"),
        }
    }

    if let Some(restart) = service.restart.as_deref().filter(|r| !r.is_empty()) {
        match RestartPolicy::from_compose(restart) {
            Some(policy) => return policy,
            None => warn!(service = %name, restart = %restart, "unknown restart value ignored"),
        }
    }

    if init {
        RestartPolicy::OnFailure
    } else {
        RestartPolicy::Always
    }
}

/// A service with its directives and classification resolved
#[derive(Clone, Debug)]
pub struct ServiceUnit<'a> {
    /// Service name
    pub name: &'a str,
    /// Service definition
    pub config: &'a ServiceConfig,
    /// Directive view over the service's metadata
    pub directives: Directives<'a>,
    /// Effective restart policy
    pub restart: RestartPolicy,
    /// Init-role member
    pub init: bool,
}

impl<'a> ServiceUnit<'a> {
    /// Resolve directives and restart policy for one service
    pub fn new(name: &'a str, config: &'a ServiceConfig) -> Result<Self> {
        let directives = Directives::new(name, &config.annotations, &config.labels);
        let init = directives.is_init()?;
        let restart = effective_restart_policy(name, config, init);
        Ok(Self {
            name,
            config,
            directives,
            restart,
            init,
        })
    }

    /// Runs outside any replica controller
    pub fn is_standalone(&self) -> bool {
        self.restart != RestartPolicy::Always && !self.init
    }

    /// Group key: explicit directive, else the service name
    pub fn group_key(&self) -> &'a str {
        self.directives.get(annotations::GROUP).unwrap_or(self.name)
    }

    /// Init container that keeps running alongside the app (`restartPolicy: Always`)
    pub fn is_sidecar(&self) -> bool {
        self.init && self.restart == RestartPolicy::Always
    }

    /// Deploy mode is global
    pub fn is_global(&self) -> bool {
        self.config.deploy.as_ref().is_some_and(|d| d.is_global())
    }
}

/// Controller for a group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadKind {
    /// Replicated
    Deployment,
    /// One pod per node
    DaemonSet,
}

/// Services sharing one pod template
#[derive(Clone, Debug)]
pub struct WorkloadGroup<'a> {
    /// Group key, also the workload name
    pub key: String,
    /// App-role members, sorted by name
    pub app: Vec<ServiceUnit<'a>>,
    /// Init-role members, sorted by name
    pub init: Vec<ServiceUnit<'a>>,
}

impl<'a> WorkloadGroup<'a> {
    /// DaemonSet if any app-role member is global
    pub fn kind(&self) -> WorkloadKind {
        if self.app.iter().any(|u| u.is_global()) {
            WorkloadKind::DaemonSet
        } else {
            WorkloadKind::Deployment
        }
    }

    /// First app-role member (by name) declaring replicas, default 1
    pub fn replicas(&self) -> i32 {
        self.app
            .iter()
            .find_map(|u| u.config.deploy.as_ref().and_then(|d| d.replicas))
            .unwrap_or(1)
    }

    /// App-role members first, then init-role members
    pub fn members(&self) -> impl Iterator<Item = &ServiceUnit<'a>> + '_ {
        self.app.iter().chain(self.init.iter())
    }
}

/// The grouping decision for a whole project
#[derive(Clone, Debug, Default)]
pub struct WorkloadPlan<'a> {
    /// Groups by key, each with at least one app-role member
    pub groups: BTreeMap<String, WorkloadGroup<'a>>,
    /// Standalone services, sorted by name
    pub standalone: Vec<ServiceUnit<'a>>,
}

impl<'a> WorkloadPlan<'a> {
    /// Classify every service of the project
    pub fn build(project: &'a Project) -> Result<Self> {
        let mut plan = WorkloadPlan::default();

        for (name, config) in &project.services {
            let unit = ServiceUnit::new(name, config)?;
            if unit.directives.flag(annotations::IGNORE)? {
                warn!(service = %name, "service ignored by directive");
                continue;
            }

            if unit.is_standalone() {
                debug!(service = %name, restart = unit.restart.as_str(), "standalone pod");
                plan.standalone.push(unit);
                continue;
            }

            let key = unit.group_key().to_string();
            let group = plan
                .groups
                .entry(key.clone())
                .or_insert_with(|| WorkloadGroup {
                    key,
                    app: Vec::new(),
                    init: Vec::new(),
                });
            if unit.init {
                group.init.push(unit);
            } else {
                group.app.push(unit);
            }
        }

        plan.groups.retain(|key, group| {
            if group.app.is_empty() {
                warn!(group = %key, "group has only init containers, dropped");
                return false;
            }
            true
        });

        plan.check_workload_names()?;
        Ok(plan)
    }

    /// Every group and standalone service must own a distinct object name
    fn check_workload_names(&self) -> Result<()> {
        let mut claimed: BTreeMap<String, &str> = BTreeMap::new();
        let owners = self
            .groups
            .keys()
            .map(String::as_str)
            .chain(self.standalone.iter().map(|u| u.name));
        for owner in owners {
            let name = sanitize_dns_label(owner);
            if let Some(previous) = claimed.insert(name.clone(), owner) {
                return Err(ConversionError::configuration(
                    owner,
                    format!("workload name '{}' is already used by '{}'", name, previous),
                ));
            }
        }
        Ok(())
    }
}
