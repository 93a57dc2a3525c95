//! Directive keys read from service, volume and secret metadata
//!
//! Directives live under the `lattice.dev/` prefix. Annotations are checked
//! before labels. Directive keys are stripped before metadata is copied onto
//! generated objects.

use std::collections::BTreeMap;

use lattice_common::LATTICE_KEY_PREFIX;

use crate::error::{ConversionError, Result};

/// Group services into one pod template
pub const GROUP: &str = "lattice.dev/group";
/// Pod service account; also emits a ServiceAccount
pub const SERVICE_ACCOUNT_NAME: &str = "lattice.dev/service-account-name";
/// Skip the service entirely
pub const IGNORE: &str = "lattice.dev/ignore";
/// Expose through an Ingress (`true` or a hostname)
pub const EXPOSE: &str = "lattice.dev/expose";
/// IngressClass for exposed services
pub const EXPOSE_INGRESS_CLASS_NAME: &str = "lattice.dev/expose-ingress-class-name";
/// HTTP path replacing the exec health check
pub const HTTP_HEALTH_CHECK_PATH: &str = "lattice.dev/http-health-check-path";
/// Port for the HTTP health check
pub const HTTP_HEALTH_CHECK_PORT: &str = "lattice.dev/http-health-check-port";
/// `init` or `app`
pub const CONTAINER_TYPE: &str = "lattice.dev/container-type";
/// JSON object used as the workload selector
pub const SELECTOR_MATCH_LABELS: &str = "lattice.dev/selector-match-labels";
/// Mount the volume from this node path
pub const VOLUME_HOST_PATH: &str = "lattice.dev/volume-host-path";
/// StorageClass for the generated claim
pub const VOLUME_STORAGE_CLASS_NAME: &str = "lattice.dev/volume-storage-class-name";
/// Requested claim size
pub const VOLUME_SIZE: &str = "lattice.dev/volume-size";
/// Key inside a secret to mount
pub const SECRET_SUB_PATH: &str = "lattice.dev/secret-sub-path";

/// Read-only view over an object's annotations and labels
#[derive(Clone, Copy, Debug)]
pub struct Directives<'a> {
    owner: &'a str,
    annotations: Option<&'a BTreeMap<String, String>>,
    labels: &'a BTreeMap<String, String>,
}

impl<'a> Directives<'a> {
    /// View over an object that has both annotations and labels
    pub fn new(
        owner: &'a str,
        annotations: &'a BTreeMap<String, String>,
        labels: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            owner,
            annotations: Some(annotations),
            labels,
        }
    }

    /// View over an object that only carries labels
    pub fn from_labels(owner: &'a str, labels: &'a BTreeMap<String, String>) -> Self {
        Self {
            owner,
            annotations: None,
            labels,
        }
    }

    /// Raw value, annotations first; empty strings count as absent
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.annotations
            .and_then(|a| a.get(key))
            .or_else(|| self.labels.get(key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Boolean directive; absent is `false`
    pub fn flag(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            None => Ok(false),
            Some(v) => parse_bool(v).ok_or_else(|| {
                ConversionError::configuration(
                    self.owner,
                    format!("{} must be a boolean, got '{}'", key, v),
                )
            }),
        }
    }

    /// Numeric port directive
    pub fn port(&self, key: &str) -> Result<Option<u16>> {
        self.get(key)
            .map(|v| {
                v.trim().parse::<u16>().map_err(|_| {
                    ConversionError::configuration(
                        self.owner,
                        format!("{} must be a port number, got '{}'", key, v),
                    )
                })
            })
            .transpose()
    }

    /// JSON object of strings
    pub fn string_map(&self, key: &str) -> Result<Option<BTreeMap<String, String>>> {
        self.get(key)
            .map(|v| {
                serde_json::from_str::<BTreeMap<String, String>>(v).map_err(|e| {
                    ConversionError::configuration(
                        self.owner,
                        format!("{} must be a JSON object of strings: {}", key, e),
                    )
                })
            })
            .transpose()
    }

    /// Init-role container (`container-type: init`)
    pub fn is_init(&self) -> Result<bool> {
        match self.get(CONTAINER_TYPE) {
            None | Some("app") => Ok(false),
            Some("init") => Ok(true),
            Some(other) => Err(ConversionError::configuration(
                self.owner,
                format!("{} must be 'init' or 'app', got '{}'", CONTAINER_TYPE, other),
            )),
        }
    }
}

/// Parse `true/false/1/0/yes/no`, case-insensitive
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Copy metadata, dropping directive keys
pub fn without_directives(map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.iter()
        .filter(|(k, _)| !k.starts_with(LATTICE_KEY_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
