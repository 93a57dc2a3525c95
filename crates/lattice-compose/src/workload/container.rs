//! Container synthesis for one service

use lattice_workload::k8s::{
    Capabilities, Container, ContainerPort, EnvVar, ResourceQuantity, ResourceRequirements,
    SecurityContext,
};
use lattice_workload::sanitize_dns_label;
use tracing::warn;

use crate::error::{ConversionError, Result};
use crate::project::{ResourceSpec, ServiceConfig};

use super::probes::compile_probe;
use super::ServiceUnit;

const NANOS_PER_MILLICORE: i64 = 1_000_000;
const BYTES_PER_MIB: i64 = 1024 * 1024;

/// Rewrite `$NAME`/`${NAME}` as `$(NAME)` and escape a literal `$(` as `$$(`
pub fn escape_command_arg(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut chars = arg.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('(') => out.push_str("$$"),
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if closed && is_var_name(&name) {
                    out.push_str(&format!("$({})", name));
                } else {
                    out.push_str("${");
                    out.push_str(&name);
                    if closed {
                        out.push('}');
                    }
                }
            }
            Some(n) if n == '_' || n.is_ascii_alphabetic() => {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n == '_' || n.is_ascii_alphanumeric() {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&format!("$({})", name));
            }
            _ => out.push('$'),
        }
    }
    out
}

fn escape_all(args: &[String]) -> Vec<String> {
    args.iter().map(|a| escape_command_arg(a)).collect()
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Escape a literal `$(` in an environment value so it is not expanded
pub fn escape_env_value(value: &str) -> String {
    value.replace("$(", "$$(")
}

/// Map a compose `pull_policy` to a Kubernetes image pull policy
pub fn image_pull_policy(policy: Option<&str>) -> &'static str {
    match policy {
        Some("always") => "Always",
        Some("never") => "Never",
        _ => "IfNotPresent",
    }
}

/// Numeric `uid[:gid]`; named identities are dropped with a warning
pub fn parse_user(service: &str, user: &str) -> (Option<i64>, Option<i64>) {
    let (uid, gid) = match user.split_once(':') {
        Some((u, g)) => (u, Some(g)),
        None => (user, None),
    };
    let parse = |part: &str, what: &str| match part.trim().parse::<i64>() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(service = %service, value = %part, "named {} is not supported, omitted", what);
            None
        }
    };
    (
        Some(uid).filter(|u| !u.is_empty()).and_then(|u| parse(u, "user")),
        gid.filter(|g| !g.is_empty()).and_then(|g| parse(g, "group")),
    )
}

/// Numeric supplemental groups; named groups are dropped with a warning
pub fn supplemental_groups(service: &str, groups: &[String]) -> Vec<i64> {
    groups
        .iter()
        .filter_map(|g| match g.trim().parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(service = %service, group = %g, "named group is not supported, omitted");
                None
            }
        })
        .collect()
}

fn quantity(spec: Option<&ResourceSpec>) -> Option<ResourceQuantity> {
    let spec = spec?;
    let q = ResourceQuantity {
        cpu: spec
            .nano_cpus
            .filter(|n| *n > 0)
            .map(|n| format!("{}m", (n + NANOS_PER_MILLICORE - 1) / NANOS_PER_MILLICORE)),
        memory: spec
            .memory_bytes
            .filter(|b| *b > 0)
            .map(|b| format!("{}Mi", (b + BYTES_PER_MIB - 1) / BYTES_PER_MIB)),
    };
    (!q.is_empty()).then_some(q)
}

/// Requests from reservations, limits from limits
pub fn compile_resources(service: &ServiceConfig) -> Option<ResourceRequirements> {
    let resources = service.deploy.as_ref()?.resources.as_ref()?;
    let requirements = ResourceRequirements {
        requests: quantity(resources.reservations.as_ref()),
        limits: quantity(resources.limits.as_ref()),
    };
    (requirements.requests.is_some() || requirements.limits.is_some()).then_some(requirements)
}

/// Container security context
pub fn compile_security_context(name: &str, service: &ServiceConfig) -> Option<SecurityContext> {
    let (run_as_user, run_as_group) = service
        .user
        .as_deref()
        .map(|u| parse_user(name, u))
        .unwrap_or((None, None));

    let capabilities = (!service.cap_add.is_empty() || !service.cap_drop.is_empty()).then(|| {
        Capabilities {
            add: (!service.cap_add.is_empty()).then(|| service.cap_add.clone()),
            drop: (!service.cap_drop.is_empty()).then(|| service.cap_drop.clone()),
        }
    });

    let ctx = SecurityContext {
        capabilities,
        privileged: service.privileged.then_some(true),
        read_only_root_filesystem: service.read_only.then_some(true),
        run_as_user,
        run_as_group,
    };
    (!ctx.is_empty()).then_some(ctx)
}

fn compile_ports(service: &ServiceConfig) -> Vec<ContainerPort> {
    let mut ports: Vec<ContainerPort> = Vec::new();
    for p in &service.ports {
        let protocol = p.protocol_or_default();
        if ports
            .iter()
            .any(|e| e.container_port == p.target && e.protocol.as_deref() == Some(protocol.as_str()))
        {
            continue;
        }
        ports.push(ContainerPort {
            name: Some(p.port_name()),
            container_port: p.target,
            protocol: Some(protocol),
        });
    }
    ports
}

/// Compiler for a single service container
pub struct ContainerCompiler;

impl ContainerCompiler {
    /// Build the container for a service; mounts are attached later by the mount resolver
    pub fn compile(unit: &ServiceUnit<'_>) -> Result<Container> {
        let service = unit.config;
        let image = service
            .image
            .clone()
            .filter(|i| !i.is_empty())
            .ok_or_else(|| ConversionError::configuration(unit.name, "service has no image"))?;

        let env = service
            .environment
            .iter()
            .map(|(k, v)| match v {
                Some(v) => EnvVar::literal(k, escape_env_value(v)),
                None => EnvVar::empty(k),
            })
            .collect();

        let probe = compile_probe(unit)?;

        Ok(Container {
            name: sanitize_dns_label(unit.name),
            image,
            image_pull_policy: Some(image_pull_policy(service.pull_policy.as_deref()).to_string()),
            command: service.entrypoint.as_deref().map(escape_all),
            args: service.command.as_deref().map(escape_all),
            working_dir: service.working_dir.clone().filter(|w| !w.is_empty()),
            env,
            ports: compile_ports(service),
            resources: compile_resources(service),
            liveness_probe: probe.clone(),
            readiness_probe: probe,
            volume_mounts: Vec::new(),
            security_context: compile_security_context(unit.name, service),
            restart_policy: unit.is_sidecar().then(|| "Always".to_string()),
        })
    }
}
