//! Kubernetes metadata primitives shared by every compiled resource
//!
//! Resources are hand-modelled serde structs rather than `k8s-openapi` types,
//! so every crate agrees on one metadata shape and one way of naming
//! API versions and kinds.

use std::collections::BTreeMap;

// =============================================================================
// ObjectMeta - Canonical Kubernetes metadata for all compiled resources
// =============================================================================

/// Standard Kubernetes ObjectMeta for compiled resources.
///
/// Used by all resource types (workloads, config, storage, networking) as the
/// unified metadata representation. Automatically adds the Lattice management
/// label on construction.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace (omitted to let the applying client choose)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Create new metadata with the standard Lattice management label
    pub fn new(name: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(
            crate::LABEL_MANAGED_BY.to_string(),
            crate::LABEL_MANAGED_BY_LATTICE.to_string(),
        );
        Self {
            name: name.into(),
            namespace: None,
            labels,
            annotations: BTreeMap::new(),
        }
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = namespace.map(str::to_string);
        self
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Merge labels, overwriting existing keys
    pub fn with_labels<'a>(mut self, labels: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (k, v) in labels {
            self.labels.insert(k.clone(), v.clone());
        }
        self
    }

    /// Merge annotations, overwriting existing keys
    pub fn with_annotations<'a>(
        mut self,
        annotations: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        for (k, v) in annotations {
            self.annotations.insert(k.clone(), v.clone());
        }
        self
    }
}

// =============================================================================
// HasApiResource Trait
// =============================================================================

/// Trait for types that have a known API group, version, and kind.
///
/// Implement this for every compiled resource type so `apiVersion`/`kind`
/// are written from one set of constants.
///
/// # Example
/// ```ignore
/// impl HasApiResource for Deployment {
///     const API_VERSION: &'static str = "apps/v1";
///     const KIND: &'static str = "Deployment";
/// }
/// ```
pub trait HasApiResource {
    /// Full API version (e.g. "apps/v1" or "v1" for the core group)
    const API_VERSION: &'static str;
    /// Resource kind (e.g. "Deployment")
    const KIND: &'static str;

    /// API group, empty for the core group
    fn api_group() -> &'static str {
        Self::API_VERSION
            .rsplit_once('/')
            .map(|(group, _)| group)
            .unwrap_or("")
    }
}

/// Split an apiVersion into (group, version); the core group is ""
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.rsplit_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake;

    impl HasApiResource for Fake {
        const API_VERSION: &'static str = "networking.k8s.io/v1";
        const KIND: &'static str = "Ingress";
    }

    struct Core;

    impl HasApiResource for Core {
        const API_VERSION: &'static str = "v1";
        const KIND: &'static str = "Secret";
    }

    #[test]
    fn object_meta_has_managed_by_label() {
        let meta = ObjectMeta::new("web");
        assert_eq!(meta.name, "web");
        assert!(meta.namespace.is_none());
        assert_eq!(
            meta.labels.get(crate::LABEL_MANAGED_BY),
            Some(&crate::LABEL_MANAGED_BY_LATTICE.to_string())
        );
    }

    #[test]
    fn object_meta_builders_merge() {
        let mut extra = BTreeMap::new();
        extra.insert("team".to_string(), "infra".to_string());
        let meta = ObjectMeta::new("web")
            .with_namespace(Some("prod"))
            .with_labels(&extra)
            .with_annotation("note", "x");
        assert_eq!(meta.namespace.as_deref(), Some("prod"));
        assert_eq!(meta.labels.get("team"), Some(&"infra".to_string()));
        assert_eq!(meta.annotations.get("note"), Some(&"x".to_string()));
    }

    #[test]
    fn namespace_is_omitted_when_unset() {
        let json = serde_json::to_value(ObjectMeta::new("web")).unwrap();
        assert!(json.get("namespace").is_none());
        assert!(json.get("annotations").is_none());
    }

    #[test]
    fn api_group_from_version() {
        assert_eq!(Fake::api_group(), "networking.k8s.io");
        assert_eq!(Core::api_group(), "");
        assert_eq!(
            parse_api_version("apps/v1"),
            ("apps".to_string(), "v1".to_string())
        );
        assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
    }
}
