//! Mount resolution
//!
//! Runs once per service added to a pod template. Steps run in order:
//! 1. tmpfs paths become memory-backed emptyDirs
//! 2. bind mounts of regular files are baked into ConfigMaps
//! 3. every remaining mount, secret and config reference is resolved to a
//!    pod volume (added once per template) and a mount on this container only
//!
//! Every pod volume name carries a prefix for its source (`tmpfs-`, `anon-`,
//! `volume-`, `bind-`, `file-`, `image-`, `secret-`, `config-`), so a named
//! volume can never shadow a generated one.
//!
//! Unresolvable references are logged, recorded as diagnostics and skipped.

use std::collections::BTreeMap;
use std::path::Path;

use lattice_workload::k8s::{Container, Volume, VolumeMount};
use lattice_workload::{push_volume_dedup, sanitize_volume_name};
use tracing::{debug, warn};

use crate::configs::ConfigMaterializer;
use crate::content::{ArtifactMapping, ArtifactMappings};
use crate::error::Result;
use crate::options::ConvertOptions;
use crate::project::{FileReference, MountKind, Project, ServiceVolumeConfig};
use crate::resources::Resources;
use crate::volumes::{VolumeMapping, VolumeMappings};
use crate::workload::ServiceUnit;

/// Directory secrets are mounted under by default
pub const SECRETS_DIR: &str = "/run/secrets";

const MEMORY_MEDIUM: &str = "Memory";

/// Resolves a service's mounts against the project's materialized artifacts
pub struct MountResolver<'a> {
    project: &'a Project,
    options: &'a ConvertOptions,
    secrets: &'a ArtifactMappings,
    configs: &'a ArtifactMappings,
    volumes: &'a VolumeMappings,
}

impl<'a> MountResolver<'a> {
    /// Create a resolver over already materialized mappings
    pub fn new(
        project: &'a Project,
        options: &'a ConvertOptions,
        secrets: &'a ArtifactMappings,
        configs: &'a ArtifactMappings,
        volumes: &'a VolumeMappings,
    ) -> Self {
        Self {
            project,
            options,
            secrets,
            configs,
            volumes,
        }
    }

    /// Add the volumes and mounts of `unit` to a pod template.
    ///
    /// Volumes already present in `pod_volumes` are not added again; mounts
    /// are only attached to `container`.
    pub fn resolve(
        &self,
        unit: &ServiceUnit<'_>,
        pod_volumes: &mut Vec<Volume>,
        container: &mut Container,
        resources: &mut Resources,
    ) -> Result<()> {
        let service = unit.config;

        for path in service.tmpfs.iter().map(|t| tmpfs_path(t)) {
            self.mount_tmpfs(path, pod_volumes, container);
        }
        for mount in service.volumes.iter().filter(|m| m.kind() == MountKind::Tmpfs) {
            self.mount_tmpfs(&mount.target, pod_volumes, container);
        }

        let baked = self.bake_bind_files(unit, resources)?;

        for (idx, mount) in service.volumes.iter().enumerate() {
            if mount.target.is_empty() {
                skip(resources, unit.name, format!("mount of {:?} has no target", mount.source));
                continue;
            }
            match mount.kind() {
                MountKind::Tmpfs => {}
                MountKind::Volume => self.mount_volume(unit, mount, pod_volumes, container, resources),
                MountKind::Bind => match baked.get(&idx) {
                    Some(mapping) => {
                        let name = sanitize_volume_name("file", &mapping.name);
                        push_volume_dedup(
                            pod_volumes,
                            Volume::from_config_map(&name, &mapping.name, None),
                        );
                        let key = mapping.key.clone().unwrap_or_default();
                        container
                            .volume_mounts
                            .push(VolumeMount::readonly_file(name, &mount.target, key));
                    }
                    None => self.mount_host_dir(unit, mount, pod_volumes, container, resources),
                },
                MountKind::Image => {
                    let Some(reference) = mount.source.as_deref() else {
                        skip(resources, unit.name, format!("image mount {} has no source", mount.target));
                        continue;
                    };
                    let name = sanitize_volume_name("image", reference);
                    push_volume_dedup(pod_volumes, Volume::from_image(&name, reference));
                    container.volume_mounts.push(VolumeMount {
                        name,
                        mount_path: mount.target.clone(),
                        sub_path: mount.subpath.clone(),
                        read_only: Some(true),
                    });
                }
                MountKind::Unknown(kind) => skip(
                    resources,
                    unit.name,
                    format!("unsupported mount type '{}' at {}", kind, mount.target),
                ),
            }
        }

        for reference in &service.secrets {
            let Some(mapping) = self.secrets.get(&reference.source) else {
                skip(resources, unit.name, format!("unknown secret '{}'", reference.source));
                continue;
            };
            let name = sanitize_volume_name("secret", &reference.source);
            push_volume_dedup(
                pod_volumes,
                Volume::from_secret(&name, &mapping.name, mapping.external.then_some(true)),
            );
            container
                .volume_mounts
                .push(artifact_mount(name, secret_target(reference), mapping));
        }

        for reference in &service.configs {
            let Some(mapping) = self.configs.get(&reference.source) else {
                skip(resources, unit.name, format!("unknown config '{}'", reference.source));
                continue;
            };
            let name = sanitize_volume_name("config", &reference.source);
            push_volume_dedup(
                pod_volumes,
                Volume::from_config_map(&name, &mapping.name, mapping.external.then_some(true)),
            );
            container
                .volume_mounts
                .push(artifact_mount(name, config_target(reference), mapping));
        }

        Ok(())
    }

    fn mount_tmpfs(&self, path: &str, pod_volumes: &mut Vec<Volume>, container: &mut Container) {
        let name = sanitize_volume_name("tmpfs", path);
        push_volume_dedup(
            pod_volumes,
            Volume::from_empty_dir(&name, Some(MEMORY_MEDIUM.to_string())),
        );
        container.volume_mounts.push(VolumeMount::new(name, path));
    }

    /// Bind mounts whose source is a regular file, keyed by their index in the service's mounts
    fn bake_bind_files(
        &self,
        unit: &ServiceUnit<'_>,
        resources: &mut Resources,
    ) -> Result<BTreeMap<usize, ArtifactMapping>> {
        let mut baked = BTreeMap::new();
        for (idx, mount) in unit.config.volumes.iter().enumerate() {
            if mount.kind() != MountKind::Bind {
                continue;
            }
            let Some(source) = mount.source.as_deref() else {
                continue;
            };
            let path = self.project.resolve_path(source);
            if !is_regular_file(&path) {
                continue;
            }
            let mapping =
                ConfigMaterializer::bake_file(unit.name, &path, self.project, self.options, resources)?;
            baked.insert(idx, mapping);
        }
        Ok(baked)
    }

    fn mount_volume(
        &self,
        unit: &ServiceUnit<'_>,
        mount: &ServiceVolumeConfig,
        pod_volumes: &mut Vec<Volume>,
        container: &mut Container,
        resources: &mut Resources,
    ) {
        let (name, volume) = match mount.source.as_deref() {
            None => {
                let name = sanitize_volume_name("anon", &mount.target);
                (name.clone(), Volume::from_empty_dir(name, None))
            }
            Some(source) => {
                let Some(mapping) = self.volumes.get(source) else {
                    skip(resources, unit.name, format!("unknown volume '{}'", source));
                    return;
                };
                let name = sanitize_volume_name("volume", source);
                let volume = match mapping {
                    VolumeMapping::Claim { claim_name } => Volume::from_pvc(&name, claim_name),
                    VolumeMapping::HostPath { path } => Volume::from_host_path(&name, path),
                };
                (name, volume)
            }
        };
        push_volume_dedup(pod_volumes, volume);
        container.volume_mounts.push(VolumeMount {
            name,
            mount_path: mount.target.clone(),
            sub_path: mount.subpath.clone(),
            read_only: mount.read_only.then_some(true),
        });
    }

    fn mount_host_dir(
        &self,
        unit: &ServiceUnit<'_>,
        mount: &ServiceVolumeConfig,
        pod_volumes: &mut Vec<Volume>,
        container: &mut Container,
        resources: &mut Resources,
    ) {
        let Some(source) = mount.source.as_deref() else {
            skip(resources, unit.name, format!("bind mount {} has no source", mount.target));
            return;
        };
        let path = self.project.resolve_path(source);
        let name = sanitize_volume_name("bind", source);
        debug!(service = %unit.name, path = %path.display(), "bind mount as host path");
        push_volume_dedup(
            pod_volumes,
            Volume::from_host_path(&name, path.to_string_lossy()),
        );
        container.volume_mounts.push(VolumeMount {
            name,
            mount_path: mount.target.clone(),
            sub_path: None,
            read_only: mount.read_only.then_some(true),
        });
    }
}

fn skip(resources: &mut Resources, service: &str, reason: String) {
    warn!(service = %service, "{}, mount skipped", reason);
    resources.diagnose(format!("{}: {}", service, reason));
}

fn is_regular_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// `tmpfs` entries may carry options after the path (`/run:size=64m`)
fn tmpfs_path(entry: &str) -> &str {
    entry.split_once(':').map(|(p, _)| p).unwrap_or(entry)
}

fn secret_target(reference: &FileReference) -> String {
    match reference.target.as_deref().filter(|t| !t.is_empty()) {
        Some(t) if t.starts_with('/') => t.to_string(),
        Some(t) => format!("{}/{}", SECRETS_DIR, t),
        None => format!("{}/{}", SECRETS_DIR, reference.source),
    }
}

fn config_target(reference: &FileReference) -> String {
    match reference.target.as_deref().filter(|t| !t.is_empty()) {
        Some(t) if t.starts_with('/') => t.to_string(),
        Some(t) => format!("/{}", t),
        None => format!("/{}", reference.source),
    }
}

/// Single file when the mapping names a key, the whole object otherwise
fn artifact_mount(name: String, target: String, mapping: &ArtifactMapping) -> VolumeMount {
    match &mapping.key {
        Some(key) => VolumeMount::readonly_file(name, target, key),
        None => VolumeMount {
            name,
            mount_path: target,
            sub_path: None,
            read_only: Some(true),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::ConfigMaterializer;
    use crate::secrets::SecretMaterializer;
    use crate::volumes::VolumeCompiler;

    struct Fixture {
        project: Project,
        options: ConvertOptions,
        resources: Resources,
        secrets: ArtifactMappings,
        configs: ArtifactMappings,
        volumes: VolumeMappings,
    }

    impl Fixture {
        fn new(project: Project) -> Self {
            let options = ConvertOptions::default();
            let mut resources = Resources::default();
            let secrets = SecretMaterializer::materialize(&project, &options, &mut resources).unwrap();
            let configs = ConfigMaterializer::materialize(&project, &options, &mut resources).unwrap();
            let volumes = VolumeCompiler::materialize(&project, &options, &mut resources).unwrap();
            Self {
                project,
                options,
                resources,
                secrets,
                configs,
                volumes,
            }
        }

        fn resolve(&mut self, service: &str) -> (Vec<Volume>, Container) {
            let resolver = MountResolver::new(
                &self.project,
                &self.options,
                &self.secrets,
                &self.configs,
                &self.volumes,
            );
            let unit = ServiceUnit::new(service, &self.project.services[service]).unwrap();
            let mut volumes = Vec::new();
            let mut container = Container::default();
            resolver
                .resolve(&unit, &mut volumes, &mut container, &mut self.resources)
                .unwrap();
            (volumes, container)
        }
    }

    #[test]
    fn targets() {
        let r = |source: &str, target: Option<&str>| FileReference {
            source: source.to_string(),
            target: target.map(str::to_string),
        };
        assert_eq!(secret_target(&r("db", None)), "/run/secrets/db");
        assert_eq!(secret_target(&r("db", Some("pw"))), "/run/secrets/pw");
        assert_eq!(secret_target(&r("db", Some("/etc/pw"))), "/etc/pw");
        assert_eq!(config_target(&r("nginx", None)), "/nginx");
        assert_eq!(config_target(&r("nginx", Some("/etc/nginx.conf"))), "/etc/nginx.conf");
        assert_eq!(tmpfs_path("/run:size=64m"), "/run");
    }

    #[test]
    fn story_named_volume_tmpfs_and_anonymous() {
        let mut fx = Fixture::new(
            Project::from_yaml(
                r#"
services:
  db:
    image: postgres
    tmpfs: /run
    volumes:
      - data:/var/lib/postgresql/data
      - /scratch
      - type: tmpfs
        target: /tmp
volumes:
  data: {}
"#,
            )
            .unwrap(),
        );
        let (volumes, container) = fx.resolve("db");
        let names: Vec<&str> = volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["tmpfs-run", "tmpfs-tmp", "volume-data", "anon-scratch"]);
        assert_eq!(
            volumes[0].empty_dir.as_ref().unwrap().medium.as_deref(),
            Some("Memory")
        );
        assert_eq!(
            volumes[2].persistent_volume_claim.as_ref().unwrap().claim_name,
            "data"
        );
        assert!(volumes[3].empty_dir.as_ref().unwrap().medium.is_none());
        assert_eq!(container.volume_mounts.len(), 4);
        assert!(fx.resources.diagnostics().is_empty());
    }

    #[test]
    fn story_bind_file_is_baked_and_directory_is_host_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nginx.conf"), "listen 80\n").unwrap();
        std::fs::create_dir(dir.path().join("html")).unwrap();

        let project = Project::from_yaml(
            r#"
services:
  web:
    image: nginx
    volumes:
      - ./nginx.conf:/etc/nginx/nginx.conf:ro
      - ./html:/usr/share/nginx/html
"#,
        )
        .unwrap()
        .with_default_working_dir(dir.path());
        let mut fx = Fixture::new(project);
        let (volumes, container) = fx.resolve("web");

        let cm = fx.resources.config_maps().next().unwrap();
        assert_eq!(cm.metadata.name, "web-nginx-conf-1dcc8d25");
        assert_eq!(volumes[0].name, "file-web-nginx-conf-1dcc8d25");
        assert_eq!(volumes[0].config_map.as_ref().unwrap().name, "web-nginx-conf-1dcc8d25");
        assert_eq!(
            container.volume_mounts[0],
            VolumeMount::readonly_file(
                "file-web-nginx-conf-1dcc8d25",
                "/etc/nginx/nginx.conf",
                "nginx.conf"
            )
        );

        let host = volumes[1].host_path.as_ref().unwrap();
        assert_eq!(Path::new(&host.path), dir.path().join("./html"));
        assert_eq!(container.volume_mounts[1].mount_path, "/usr/share/nginx/html");
    }

    #[test]
    fn story_secret_and_config_mounts() {
        let mut fx = Fixture::new(
            Project::from_yaml(
                r#"
services:
  api:
    image: api
    secrets:
      - db-password
      - source: vault
        target: token
    configs:
      - source: app
        target: /etc/app.yaml
secrets:
  db-password:
    content: hunter2
  vault:
    external: true
configs:
  app:
    content: "debug: false"
"#,
            )
            .unwrap(),
        );
        let (volumes, container) = fx.resolve("api");

        let db = volumes.iter().find(|v| v.name == "secret-db-password").unwrap();
        assert_eq!(db.secret.as_ref().unwrap().secret_name, "db-password-0a32a8f8");
        assert_eq!(db.secret.as_ref().unwrap().optional, None);

        let vault = volumes.iter().find(|v| v.name == "secret-vault").unwrap();
        assert_eq!(vault.secret.as_ref().unwrap().secret_name, "vault");
        assert_eq!(vault.secret.as_ref().unwrap().optional, Some(true));

        let mounts: Vec<(&str, Option<&str>)> = container
            .volume_mounts
            .iter()
            .map(|m| (m.mount_path.as_str(), m.sub_path.as_deref()))
            .collect();
        assert_eq!(
            mounts,
            vec![
                ("/run/secrets/db-password", Some("content")),
                ("/run/secrets/token", None),
                ("/etc/app.yaml", Some("content")),
            ]
        );
        assert!(container.volume_mounts.iter().all(|m| m.read_only == Some(true)));
    }

    #[test]
    fn story_unknown_references_are_skipped_with_diagnostics() {
        let mut fx = Fixture::new(
            Project::from_yaml(
                r#"
services:
  web:
    image: nginx
    volumes:
      - missing:/data
      - type: npipe
        source: \\.\pipe\docker_engine
        target: /pipe
    secrets: [nope]
    configs: [nada]
"#,
            )
            .unwrap(),
        );
        let (volumes, container) = fx.resolve("web");
        assert!(volumes.is_empty());
        assert!(container.volume_mounts.is_empty());
        assert_eq!(fx.resources.diagnostics().len(), 4);
        assert!(fx.resources.diagnostics()[0].starts_with("web: "));
    }

    #[test]
    fn story_named_volume_does_not_shadow_tmpfs() {
        let mut fx = Fixture::new(
            Project::from_yaml(
                r#"
services:
  cache:
    image: redis
    tmpfs: /run
    volumes:
      - tmpfs-run:/data
volumes:
  tmpfs-run: {}
"#,
            )
            .unwrap(),
        );
        let (volumes, container) = fx.resolve("cache");
        assert_eq!(volumes.len(), 2);
        assert!(volumes[0].empty_dir.is_some());
        assert_eq!(volumes[1].name, "volume-tmpfs-run");
        assert_eq!(
            volumes[1].persistent_volume_claim.as_ref().unwrap().claim_name,
            "tmpfs-run"
        );
        let mounts: Vec<(&str, &str)> = container
            .volume_mounts
            .iter()
            .map(|m| (m.name.as_str(), m.mount_path.as_str()))
            .collect();
        assert_eq!(mounts, vec![("tmpfs-run", "/run"), ("volume-tmpfs-run", "/data")]);
    }

    #[test]
    fn story_shared_volume_declared_once_per_template() {
        let mut fx = Fixture::new(
            Project::from_yaml(
                r#"
services:
  a:
    image: a
    volumes: ["shared:/a"]
  b:
    image: b
    volumes: ["shared:/b"]
volumes:
  shared: {}
"#,
            )
            .unwrap(),
        );
        let resolver = MountResolver::new(
            &fx.project,
            &fx.options,
            &fx.secrets,
            &fx.configs,
            &fx.volumes,
        );
        let mut pod_volumes = Vec::new();
        let mut a = Container::default();
        let mut b = Container::default();
        for (name, container) in [("a", &mut a), ("b", &mut b)] {
            let unit = ServiceUnit::new(name, &fx.project.services[name]).unwrap();
            resolver
                .resolve(&unit, &mut pod_volumes, container, &mut fx.resources)
                .unwrap();
        }
        assert_eq!(pod_volumes.len(), 1);
        assert_eq!(a.volume_mounts.len(), 1);
        assert_eq!(a.volume_mounts[0].mount_path, "/a");
        assert_eq!(b.volume_mounts[0].mount_path, "/b");
    }
}
