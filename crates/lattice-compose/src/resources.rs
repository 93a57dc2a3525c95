//! Resource collection
//!
//! Holds every generated object keyed by (kind, name). Inserting an identity
//! that already exists is a no-op, and iteration is always in apply order:
//! kind priority first, then name. Re-running a conversion on unchanged
//! input therefore renders byte-identical output.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use lattice_common::kube_utils::ObjectMeta;
use lattice_common::yaml;
use lattice_workload::k8s::{ConfigMap, Secret};
use serde::Serialize;
use tracing::debug;

use crate::error::{ConversionError, Result};
use crate::network::{Ingress, Service};
use crate::volumes::PersistentVolumeClaim;
use crate::workload::{DaemonSet, Deployment, Pod, ServiceAccount};

/// Kinds of generated objects, declared in apply order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    /// v1 ServiceAccount
    ServiceAccount,
    /// v1 Secret
    Secret,
    /// v1 ConfigMap
    ConfigMap,
    /// v1 PersistentVolumeClaim
    PersistentVolumeClaim,
    /// v1 Service
    Service,
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 DaemonSet
    DaemonSet,
    /// v1 Pod
    Pod,
    /// networking.k8s.io/v1 Ingress
    Ingress,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Any generated object
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Resource {
    /// ServiceAccount
    ServiceAccount(ServiceAccount),
    /// Secret
    Secret(Secret),
    /// ConfigMap
    ConfigMap(ConfigMap),
    /// PersistentVolumeClaim
    PersistentVolumeClaim(PersistentVolumeClaim),
    /// Service
    Service(Service),
    /// Deployment
    Deployment(Deployment),
    /// DaemonSet
    DaemonSet(DaemonSet),
    /// Pod
    Pod(Pod),
    /// Ingress
    Ingress(Ingress),
}

/// Generates `From`, the kind/metadata dispatch and a typed iterator per variant
macro_rules! resource_variants {
    ($($variant:ident => $iter:ident),* $(,)?) => {
        $(
            impl From<$variant> for Resource {
                fn from(value: $variant) -> Self {
                    Resource::$variant(value)
                }
            }
        )*

        impl Resource {
            /// Kind of this object
            pub fn kind(&self) -> ResourceKind {
                match self {
                    $(Resource::$variant(_) => ResourceKind::$variant,)*
                }
            }

            /// Metadata of this object
            pub fn metadata(&self) -> &ObjectMeta {
                match self {
                    $(Resource::$variant(r) => &r.metadata,)*
                }
            }
        }

        impl Resources {
            $(
                #[doc = concat!("Every ", stringify!($variant), " in name order")]
                pub fn $iter(&self) -> impl Iterator<Item = &$variant> + '_ {
                    self.objects
                        .range((ResourceKind::$variant, String::new())..)
                        .take_while(|((kind, _), _)| *kind == ResourceKind::$variant)
                        .filter_map(|(_, r)| match r {
                            Resource::$variant(inner) => Some(inner),
                            _ => None,
                        })
                }
            )*
        }
    };
}

resource_variants! {
    ServiceAccount => service_accounts,
    Secret => secrets,
    ConfigMap => config_maps,
    PersistentVolumeClaim => claims,
    Service => services,
    Deployment => deployments,
    DaemonSet => daemon_sets,
    Pod => pods,
    Ingress => ingresses,
}

impl Resource {
    /// Object name
    pub fn name(&self) -> &str {
        &self.metadata().name
    }
}

/// Every object produced by one conversion, plus non-fatal diagnostics
#[derive(Clone, Debug, Default)]
pub struct Resources {
    objects: BTreeMap<(ResourceKind, String), Resource>,
    diagnostics: Vec<String>,
}

impl Resources {
    /// Insert an object; returns `false` (and keeps the existing one) on a duplicate identity
    pub fn insert(&mut self, resource: impl Into<Resource>) -> bool {
        let resource = resource.into();
        let key = (resource.kind(), resource.name().to_string());
        if self.objects.contains_key(&key) {
            debug!(kind = %key.0, name = %key.1, "duplicate resource ignored");
            return false;
        }
        self.objects.insert(key, resource);
        true
    }

    /// Whether an object with this identity exists
    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.objects.contains_key(&(kind, name.to_string()))
    }

    /// Look up an object
    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<&Resource> {
        self.objects.get(&(kind, name.to_string()))
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// No objects were generated
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of objects of one kind
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.objects.keys().filter(|(k, _)| *k == kind).count()
    }

    /// All objects in apply order
    pub fn iter(&self) -> impl Iterator<Item = &Resource> + '_ {
        self.objects.values()
    }

    /// Record a non-fatal problem (e.g. a skipped mount)
    pub fn diagnose(&mut self, message: impl Into<String>) {
        self.diagnostics.push(message.into());
    }

    /// Non-fatal problems recorded during conversion
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Render all objects as multi-document YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(yaml::to_multi_document(self.iter())?)
    }

    /// Write all objects as multi-document YAML
    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        let rendered = self.to_yaml()?;
        writer
            .write_all(rendered.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(ConversionError::Write)
    }
}

impl<'a> IntoIterator for &'a Resources {
    type Item = &'a Resource;
    type IntoIter = std::collections::btree_map::Values<'a, (ResourceKind, String), Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(name: &str, value: &[u8]) -> Secret {
        Secret::new(ObjectMeta::new(name)).with_bytes("k", value)
    }

    #[test]
    fn story_duplicate_identity_keeps_first() {
        let mut resources = Resources::default();
        assert!(resources.insert(secret("token", b"first")));
        assert!(!resources.insert(secret("token", b"second")));
        assert_eq!(resources.len(), 1);
        let kept = resources.secrets().next().unwrap();
        assert_eq!(kept.data.get("k"), Some(&"Zmlyc3Q=".to_string()));
    }

    #[test]
    fn story_order_is_kind_then_name() {
        let mut resources = Resources::default();
        resources.insert(ConfigMap::new(ObjectMeta::new("b-config")));
        resources.insert(secret("z-secret", b"x"));
        resources.insert(ServiceAccount::new(ObjectMeta::new("runner")));
        resources.insert(ConfigMap::new(ObjectMeta::new("a-config")));

        let order: Vec<(ResourceKind, &str)> =
            resources.iter().map(|r| (r.kind(), r.name())).collect();
        assert_eq!(
            order,
            vec![
                (ResourceKind::ServiceAccount, "runner"),
                (ResourceKind::Secret, "z-secret"),
                (ResourceKind::ConfigMap, "a-config"),
                (ResourceKind::ConfigMap, "b-config"),
            ]
        );
    }

    #[test]
    fn typed_iterators_stay_within_kind() {
        let mut resources = Resources::default();
        resources.insert(ConfigMap::new(ObjectMeta::new("cfg")));
        resources.insert(secret("a", b"x"));
        resources.insert(secret("b", b"y"));
        assert_eq!(resources.secrets().count(), 2);
        assert_eq!(resources.config_maps().count(), 1);
        assert_eq!(resources.pods().count(), 0);
        assert_eq!(resources.count(ResourceKind::Secret), 2);
    }

    #[test]
    fn yaml_documents_are_separated() {
        let mut resources = Resources::default();
        resources.insert(ConfigMap::new(ObjectMeta::new("a")));
        resources.insert(ConfigMap::new(ObjectMeta::new("b")));
        let out = resources.to_yaml().unwrap();
        assert_eq!(yaml::split_documents(&out).len(), 2);
        assert!(out.starts_with("apiVersion: v1\nkind: ConfigMap\n"));
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writer_failure_is_a_write_error() {
        let mut resources = Resources::default();
        resources.insert(ConfigMap::new(ObjectMeta::new("a")));
        let err = resources.write(ClosedPipe).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::Write(ref e) if e.kind() == std::io::ErrorKind::BrokenPipe
        ));
    }

    #[test]
    fn empty_collection_renders_nothing() {
        let mut out = Vec::new();
        Resources::default().write(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
