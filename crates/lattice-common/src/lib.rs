//! Common types for Lattice compose tooling: metadata, labels, logging and YAML rendering

#![deny(missing_docs)]

pub mod kube_utils;
pub mod telemetry;
pub mod yaml;

pub use kube_utils::{HasApiResource, ObjectMeta};

/// Standard label carrying the logical application name (also used as the pod selector)
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Standard label recording which tool manages a resource
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] for resources generated by Lattice
pub const LABEL_MANAGED_BY_LATTICE: &str = "lattice";

/// Prefix shared by every Lattice directive, label and annotation key
pub const LATTICE_KEY_PREFIX: &str = "lattice.dev/";

/// Label recording the logical (pre-hash) name of a generated object
pub const LABEL_ORIGINAL_NAME: &str = "lattice.dev/original-name";

/// Label recording the domain key a content-addressed object was hashed with
pub const LABEL_CONTENT_KEY: &str = "lattice.dev/content-key";

/// Annotation recording the project-relative file a generated object was read from
pub const ANNOTATION_SOURCE_PATH: &str = "lattice.dev/source-path";

/// Annotation recording the tool version that generated a manifest
pub const ANNOTATION_VERSION: &str = "lattice.dev/version";
