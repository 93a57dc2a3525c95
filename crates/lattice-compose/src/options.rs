//! Conversion options
//!
//! Policy constants passed into [`crate::convert`] rather than held globally,
//! so two configurations (e.g. two domain-key versions) can run side by side.

use std::collections::BTreeMap;

use lattice_common::ObjectMeta;

/// Default domain key for secret name hashing
pub const DEFAULT_SECRETS_KEY: &str = "lattice.secrets.v1";
/// Default domain key for config name hashing
pub const DEFAULT_CONFIGS_KEY: &str = "lattice.configs.v1";
/// Default claim capacity when a volume does not declare one
pub const DEFAULT_VOLUME_SIZE: &str = "10Gi";
/// Default claim access mode
pub const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

/// Options controlling one conversion
#[derive(Clone, Debug)]
pub struct ConvertOptions {
    /// HMAC key for secret names; changing it renames every generated secret
    pub secrets_key: String,
    /// HMAC key for config names; changing it renames every generated config
    pub configs_key: String,
    /// Claim size used when no size directive is present
    pub default_volume_size: String,
    /// Claim access mode
    pub default_access_mode: String,
    /// Namespace stamped on every object; unset leaves the choice to the client
    pub namespace: Option<String>,
    /// Labels stamped on every object
    pub labels: BTreeMap<String, String>,
    /// Annotations stamped on every object
    pub annotations: BTreeMap<String, String>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            secrets_key: DEFAULT_SECRETS_KEY.to_string(),
            configs_key: DEFAULT_CONFIGS_KEY.to_string(),
            default_volume_size: DEFAULT_VOLUME_SIZE.to_string(),
            default_access_mode: DEFAULT_ACCESS_MODE.to_string(),
            namespace: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }
}

impl ConvertOptions {
    /// Set the target namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add a label stamped on every object
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation stamped on every object
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Metadata for a generated object: namespace plus the stamped labels and annotations
    pub fn object_meta(&self, name: impl Into<String>) -> ObjectMeta {
        ObjectMeta::new(name)
            .with_namespace(self.namespace.as_deref())
            .with_labels(&self.labels)
            .with_annotations(&self.annotations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = ConvertOptions::default();
        assert_eq!(options.secrets_key, "lattice.secrets.v1");
        assert_eq!(options.configs_key, "lattice.configs.v1");
        assert_eq!(options.default_volume_size, "10Gi");
        assert_eq!(options.default_access_mode, "ReadWriteOnce");
        assert!(options.namespace.is_none());
    }

    #[test]
    fn object_meta_is_stamped() {
        let options = ConvertOptions::default()
            .with_namespace("prod")
            .with_label("team", "infra")
            .with_annotation("owner", "ops");
        let meta = options.object_meta("web");
        assert_eq!(meta.namespace.as_deref(), Some("prod"));
        assert_eq!(meta.labels.get("team"), Some(&"infra".to_string()));
        assert_eq!(meta.annotations.get("owner"), Some(&"ops".to_string()));
        assert_eq!(
            meta.labels.get(lattice_common::LABEL_MANAGED_BY),
            Some(&"lattice".to_string())
        );
    }
}
