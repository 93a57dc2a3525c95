//! Network exposure: discovery Services and Ingress rules
//!
//! One Service per group, derived from the first service in the group that
//! declares ports. An `expose` directive on that service adds an Ingress
//! routing `/` to the Service's first TCP port.

use std::collections::BTreeMap;

use lattice_common::kube_utils::{HasApiResource, ObjectMeta};
use lattice_workload::sanitize_dns_label;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::annotations::{self, parse_bool, Directives};
use crate::options::ConvertOptions;
use crate::project::ServiceConfig;
use crate::resources::{ResourceKind, Resources};

// =============================================================================
// Service
// =============================================================================

/// Kubernetes Service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// API version
    #[serde(default = "Service::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Service::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: ServiceSpec,
}

impl HasApiResource for Service {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Service";
}

impl_api_defaults!(Service);

/// Service spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Selector
    pub selector: BTreeMap<String, String>,
    /// Ports
    pub ports: Vec<ServicePort>,
    /// Service type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Service port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Port number
    pub port: u16,
    /// Target port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,
    /// Protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

// =============================================================================
// Ingress
// =============================================================================

/// Kubernetes Ingress (networking.k8s.io/v1)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ingress {
    /// API version
    #[serde(default = "Ingress::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Ingress::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: IngressSpec,
}

impl HasApiResource for Ingress {
    const API_VERSION: &'static str = "networking.k8s.io/v1";
    const KIND: &'static str = "Ingress";
}

impl_api_defaults!(Ingress);

/// Ingress spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    /// IngressClass name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    /// Rules
    pub rules: Vec<IngressRule>,
}

/// Ingress rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    /// Host name
    pub host: String,
    /// HTTP paths
    pub http: HttpIngressRuleValue,
}

/// HTTP paths of a rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpIngressRuleValue {
    /// Paths
    pub paths: Vec<HttpIngressPath>,
}

/// One routed path
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpIngressPath {
    /// Path
    pub path: String,
    /// Path matching (Prefix, Exact, ImplementationSpecific)
    pub path_type: String,
    /// Backend
    pub backend: IngressBackend,
}

/// Ingress backend
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressBackend {
    /// Backend Service
    pub service: IngressServiceBackend,
}

/// Backend Service reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressServiceBackend {
    /// Service name
    pub name: String,
    /// Service port
    pub port: ServiceBackendPort,
}

/// Backend port by number
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBackendPort {
    /// Port number
    pub number: u16,
}

// =============================================================================
// Network Compiler
// =============================================================================

/// Compiler for Services and Ingresses
pub struct NetworkCompiler;

impl NetworkCompiler {
    /// Derive the discovery Service (and optional Ingress) for a group.
    ///
    /// `members` are the group's services in processing order; the first one
    /// with ports drives both objects. Returns whether a Service was created.
    pub fn compile<'a>(
        group: &str,
        selector: &BTreeMap<String, String>,
        members: impl IntoIterator<Item = (&'a str, &'a ServiceConfig)>,
        options: &ConvertOptions,
        resources: &mut Resources,
    ) -> bool {
        let Some((service_name, service)) = members.into_iter().find(|(_, s)| !s.ports.is_empty())
        else {
            return false;
        };

        if resources.contains(ResourceKind::Service, group) {
            debug!(group = %group, "service already exists, skipping");
            return false;
        }

        let discovery = Self::compile_service(group, selector, service, options);
        let backend_port = discovery
            .spec
            .ports
            .iter()
            .find(|p| p.protocol.as_deref().unwrap_or("TCP") == "TCP")
            .map(|p| p.port);
        resources.insert(discovery);

        let directives = Directives::new(service_name, &service.annotations, &service.labels);
        if let Some(host) = Self::expose_host(service_name, &directives) {
            match backend_port {
                Some(port) => {
                    let class = directives
                        .get(annotations::EXPOSE_INGRESS_CLASS_NAME)
                        .map(str::to_string);
                    resources.insert(Self::compile_ingress(group, &host, port, class, options));
                }
                None => {
                    let msg = format!(
                        "service {} is exposed but declares no TCP port; no ingress generated",
                        service_name
                    );
                    warn!(service = %service_name, "{}", msg);
                    resources.diagnose(msg);
                }
            }
        }

        true
    }

    /// Host for the expose directive: `true` means the service name as a DNS label, `false` disables
    fn expose_host(service_name: &str, directives: &Directives<'_>) -> Option<String> {
        let value = directives.get(annotations::EXPOSE)?;
        match parse_bool(value) {
            Some(true) => Some(sanitize_dns_label(service_name)),
            Some(false) => None,
            None => Some(value.to_string()),
        }
    }

    fn compile_service(
        group: &str,
        selector: &BTreeMap<String, String>,
        service: &ServiceConfig,
        options: &ConvertOptions,
    ) -> Service {
        let mut ports: Vec<ServicePort> = Vec::new();
        for p in &service.ports {
            let port = p.published.unwrap_or(p.target);
            let protocol = p.protocol_or_default();
            if ports.iter().any(|existing| {
                existing.port == port && existing.protocol.as_deref() == Some(protocol.as_str())
            }) {
                continue;
            }
            let name = unique_port_name(&ports, p.port_name(), &protocol, port);
            ports.push(ServicePort {
                name: Some(name),
                port,
                target_port: Some(p.target),
                protocol: Some(protocol),
            });
        }

        Service {
            api_version: Service::default_api_version(),
            kind: Service::default_kind(),
            metadata: options.object_meta(group),
            spec: ServiceSpec {
                selector: selector.clone(),
                ports,
                type_: None,
            },
        }
    }

    fn compile_ingress(
        group: &str,
        host: &str,
        port: u16,
        ingress_class_name: Option<String>,
        options: &ConvertOptions,
    ) -> Ingress {
        Ingress {
            api_version: Ingress::default_api_version(),
            kind: Ingress::default_kind(),
            metadata: options.object_meta(group),
            spec: IngressSpec {
                ingress_class_name,
                rules: vec![IngressRule {
                    host: host.to_string(),
                    http: HttpIngressRuleValue {
                        paths: vec![HttpIngressPath {
                            path: "/".to_string(),
                            path_type: "Prefix".to_string(),
                            backend: IngressBackend {
                                service: IngressServiceBackend {
                                    name: group.to_string(),
                                    port: ServiceBackendPort { number: port },
                                },
                            },
                        }],
                    },
                }],
            },
        }
    }
}

/// Port names must be unique within a Service. Ports sharing a target fall
/// back to `{protocol}-{port}`, then to a numeric suffix.
fn unique_port_name(ports: &[ServicePort], preferred: String, protocol: &str, port: u16) -> String {
    let taken = |name: &str| ports.iter().any(|p| p.name.as_deref() == Some(name));
    if !taken(&preferred) {
        return preferred;
    }
    let base = format!("{}-{}", protocol.to_ascii_lowercase(), port);
    let mut name = base.clone();
    let mut n = 2;
    while taken(&name) {
        name = format!("{}-{}", base, n);
        n += 1;
    }
    name
}
