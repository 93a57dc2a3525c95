//! Compose project to Kubernetes manifest compiler
//!
//! Turns a resolved multi-service project into a deterministic set of
//! Kubernetes objects:
//! - Secrets and ConfigMaps named after a keyed hash of their content
//! - PersistentVolumeClaims (or host paths) for named volumes
//! - Deployments, DaemonSets or standalone Pods, one per service group
//! - Services and Ingresses for services that declare ports
//!
//! # Usage
//!
//! ```rust,ignore
//! let project = Project::from_yaml(&input)?;
//! let resources = convert(&project, &ConvertOptions::default())?;
//! resources.write(std::io::stdout().lock())?;
//! ```

#![deny(missing_docs)]

/// Implement `default_api_version`/`default_kind` helpers from `HasApiResource`
macro_rules! impl_api_defaults {
    ($type:ty) => {
        impl $type {
            fn default_api_version() -> String {
                <Self as lattice_common::HasApiResource>::API_VERSION.to_string()
            }
            fn default_kind() -> String {
                <Self as lattice_common::HasApiResource>::KIND.to_string()
            }
        }
    };
}

pub mod annotations;
pub mod compiler;
pub mod configs;
pub mod content;
pub mod error;
pub mod mounts;
pub mod network;
pub mod options;
pub mod project;
pub mod resources;
pub mod secrets;
pub mod volumes;
pub mod workload;

pub use compiler::convert;
pub use error::ConversionError;
pub use options::ConvertOptions;
pub use project::Project;
pub use resources::{Resource, ResourceKind, Resources};
