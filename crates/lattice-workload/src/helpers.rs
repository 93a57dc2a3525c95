//! Naming and de-duplication helpers shared by workload compilers

use std::collections::HashSet;

use crate::k8s::{Volume, VolumeMount};

/// Maximum length of a Kubernetes DNS-1123 label
pub const MAX_DNS_LABEL_LEN: usize = 63;

/// Sanitize a string to a valid DNS-1123 label.
///
/// Lowercases, replaces anything that is not `[a-z0-9]` with `-`, trims
/// leading/trailing dashes and truncates to 63 characters.
pub fn sanitize_dns_label(s: &str) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    truncate_label(sanitized.trim_matches('-'))
}

/// Build a volume name from a prefix and an arbitrary string such as a path.
///
/// `sanitize_volume_name("tmpfs", "/var/run")` yields `tmpfs-var-run`.
pub fn sanitize_volume_name(prefix: &str, raw: &str) -> String {
    let body = sanitize_dns_label(raw);
    if body.is_empty() {
        return truncate_label(prefix);
    }
    truncate_label(&format!("{}-{}", prefix, body))
}

fn truncate_label(s: &str) -> String {
    if s.len() > MAX_DNS_LABEL_LEN {
        s[..MAX_DNS_LABEL_LEN].trim_end_matches('-').to_string()
    } else {
        s.to_string()
    }
}

/// Append a volume unless one with the same name is already declared.
///
/// Returns `true` if the volume was added.
pub fn push_volume_dedup(volumes: &mut Vec<Volume>, volume: Volume) -> bool {
    if volumes.iter().any(|v| v.name == volume.name) {
        return false;
    }
    volumes.push(volume);
    true
}

/// Remove repeated mounts, keyed by (volume name, mount path), keeping the first.
pub fn dedup_volume_mounts(mounts: &mut Vec<VolumeMount>) {
    let mut seen = HashSet::new();
    mounts.retain(|m| seen.insert((m.name.clone(), m.mount_path.clone())));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_label_lowercases_and_replaces() {
        assert_eq!(sanitize_dns_label("My_Service.v2"), "my-service-v2");
        assert_eq!(sanitize_dns_label("--web--"), "web");
    }

    #[test]
    fn dns_label_truncates_without_trailing_dash() {
        let long = format!("{}-{}", "a".repeat(62), "b".repeat(10));
        let label = sanitize_dns_label(&long);
        assert_eq!(label.len(), 62);
        assert!(!label.ends_with('-'));
    }

    #[test]
    fn volume_name_from_path() {
        assert_eq!(sanitize_volume_name("tmpfs", "/var/run"), "tmpfs-var-run");
        assert_eq!(sanitize_volume_name("tmpfs", "/"), "tmpfs");
        assert_eq!(sanitize_volume_name("bind", "./data/cache"), "bind-data-cache");
    }

    #[test]
    fn story_repeated_volume_is_not_redeclared() {
        let mut volumes = vec![];
        assert!(push_volume_dedup(&mut volumes, Volume::from_pvc("data", "data")));
        assert!(!push_volume_dedup(&mut volumes, Volume::from_pvc("data", "other")));
        assert_eq!(volumes.len(), 1);
        assert_eq!(
            volumes[0].persistent_volume_claim.as_ref().unwrap().claim_name,
            "data"
        );
    }

    #[test]
    fn story_duplicate_mounts_keep_first() {
        let mut mounts = vec![
            VolumeMount::new("data", "/data"),
            VolumeMount::readonly_file("data", "/data", "x"),
            VolumeMount::new("data", "/other"),
        ];
        dedup_volume_mounts(&mut mounts);
        assert_eq!(mounts.len(), 2);
        assert!(mounts[0].sub_path.is_none());
        assert_eq!(mounts[1].mount_path, "/other");
    }
}
