//! Named volume materialization
//!
//! Every named volume becomes either a host path reference or a claim.
//! Host paths come from the `volume-host-path` directive or from
//! `driver_opts` of `o: bind` with a `device`. Everything else gets a
//! PersistentVolumeClaim sized by the `volume-size` directive.

use std::collections::BTreeMap;

use lattice_common::kube_utils::{HasApiResource, ObjectMeta};
use lattice_common::LABEL_ORIGINAL_NAME;
use lattice_workload::sanitize_dns_label;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::annotations::{self, without_directives, Directives};
use crate::error::{ConversionError, Result};
use crate::options::ConvertOptions;
use crate::project::{Project, VolumeConfig};
use crate::resources::Resources;

// =============================================================================
// PersistentVolumeClaim
// =============================================================================

/// Kubernetes PersistentVolumeClaim
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaim {
    /// API version (v1)
    #[serde(default = "PersistentVolumeClaim::default_api_version")]
    pub api_version: String,
    /// Resource kind (PersistentVolumeClaim)
    #[serde(default = "PersistentVolumeClaim::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// PVC spec
    pub spec: PvcSpec,
}

impl HasApiResource for PersistentVolumeClaim {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "PersistentVolumeClaim";
}

impl_api_defaults!(PersistentVolumeClaim);

/// PVC spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvcSpec {
    /// Access modes (ReadWriteOnce, ReadWriteMany, ReadOnlyMany)
    pub access_modes: Vec<String>,
    /// Resource requirements
    pub resources: PvcResources,
    /// Storage class name; unset uses the cluster default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

/// PVC resource requirements
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvcResources {
    /// Storage requests
    pub requests: PvcStorage,
}

/// PVC storage request
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvcStorage {
    /// Storage size (e.g., "10Gi")
    pub storage: String,
}

// =============================================================================
// Mapping
// =============================================================================

/// What a named volume resolves to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VolumeMapping {
    /// Mount a claim
    Claim {
        /// Claim name
        claim_name: String,
    },
    /// Mount a node directory
    HostPath {
        /// Path on the node
        path: String,
    },
}

/// Volume name to mapping
pub type VolumeMappings = BTreeMap<String, VolumeMapping>;

/// Check that a string is a Kubernetes resource quantity (`10Gi`, `500M`, `1.5e3`)
pub fn is_valid_quantity(s: &str) -> bool {
    let digits_end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(digits_end);
    if number.is_empty() || number == "." || number.matches('.').count() > 1 {
        return false;
    }
    match suffix {
        "" | "Ki" | "Mi" | "Gi" | "Ti" | "Pi" | "Ei" | "n" | "u" | "m" | "k" | "M" | "G" | "T"
        | "P" | "E" => true,
        exp => {
            let rest = exp
                .strip_prefix('e')
                .or_else(|| exp.strip_prefix('E'))
                .map(|r| r.strip_prefix(['+', '-']).unwrap_or(r));
            matches!(rest, Some(r) if !r.is_empty() && r.chars().all(|c| c.is_ascii_digit()))
        }
    }
}

/// Compiler for named volumes
pub struct VolumeCompiler;

impl VolumeCompiler {
    /// Resolve every named volume, emitting claims into `resources`
    pub fn materialize(
        project: &Project,
        options: &ConvertOptions,
        resources: &mut Resources,
    ) -> Result<VolumeMappings> {
        let mut mappings = VolumeMappings::new();
        for (name, volume) in &project.volumes {
            let mapping = Self::compile_volume(name, volume, options, resources)?;
            debug!(volume = %name, mapping = ?mapping, "resolved volume");
            mappings.insert(name.clone(), mapping);
        }
        Ok(mappings)
    }

    fn compile_volume(
        name: &str,
        volume: &VolumeConfig,
        options: &ConvertOptions,
        resources: &mut Resources,
    ) -> Result<VolumeMapping> {
        let directives = Directives::from_labels(name, &volume.labels);

        if let Some(path) = directives.get(annotations::VOLUME_HOST_PATH) {
            return Ok(VolumeMapping::HostPath {
                path: path.to_string(),
            });
        }
        if volume.driver_opts.get("o").map(String::as_str) == Some("bind") {
            if let Some(device) = volume.driver_opts.get("device").filter(|d| !d.is_empty()) {
                return Ok(VolumeMapping::HostPath {
                    path: device.clone(),
                });
            }
        }

        if volume.external {
            return Ok(VolumeMapping::Claim {
                claim_name: volume.name.clone().unwrap_or_else(|| name.to_string()),
            });
        }

        let size = directives
            .get(annotations::VOLUME_SIZE)
            .unwrap_or(options.default_volume_size.as_str());
        if !is_valid_quantity(size) {
            return Err(ConversionError::invalid_size(name, size));
        }

        let claim_name = sanitize_dns_label(name);
        let pvc = Self::compile_pvc(
            &claim_name,
            name,
            size,
            directives.get(annotations::VOLUME_STORAGE_CLASS_NAME),
            volume,
            options,
        );
        resources.insert(pvc);

        Ok(VolumeMapping::Claim { claim_name })
    }

    fn compile_pvc(
        claim_name: &str,
        original_name: &str,
        size: &str,
        storage_class: Option<&str>,
        volume: &VolumeConfig,
        options: &ConvertOptions,
    ) -> PersistentVolumeClaim {
        let metadata = options
            .object_meta(claim_name)
            .with_labels(&without_directives(&volume.labels))
            .with_label(LABEL_ORIGINAL_NAME, original_name);

        PersistentVolumeClaim {
            api_version: PersistentVolumeClaim::default_api_version(),
            kind: PersistentVolumeClaim::default_kind(),
            metadata,
            spec: PvcSpec {
                access_modes: vec![options.default_access_mode.clone()],
                resources: PvcResources {
                    requests: PvcStorage {
                        storage: size.to_string(),
                    },
                },
                storage_class_name: storage_class.map(str::to_string),
            },
        }
    }
}
