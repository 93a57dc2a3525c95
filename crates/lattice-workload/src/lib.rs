//! Kubernetes pod primitives shared by Lattice workload compilers
//!
//! Hand-modelled serde types for the pieces of a pod template (containers,
//! probes, volumes, mounts, security contexts) together with ConfigMap and
//! Secret, plus naming helpers. Compilers wrap these in their own top-level
//! resources (Deployment, DaemonSet, Pod).
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut volumes = Vec::new();
//! push_volume_dedup(&mut volumes, Volume::from_empty_dir("tmpfs-run", Some("Memory".into())));
//! ```

pub mod helpers;
pub mod k8s;

pub use helpers::{dedup_volume_mounts, push_volume_dedup, sanitize_dns_label, sanitize_volume_name};
pub use k8s::{ConfigMap, Container, IntOrString, Secret, Volume, VolumeMount};
