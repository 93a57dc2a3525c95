//! End-to-end conversion tests

use std::path::Path;

use lattice_common::yaml;
use lattice_compose::content::short_hash;
use lattice_compose::{convert, ConversionError, ConvertOptions, Project, ResourceKind, Resources};

fn load(yaml: &str, dir: &Path) -> Project {
    Project::from_yaml(yaml)
        .unwrap()
        .with_default_working_dir(dir)
}

fn run(yaml: &str, dir: &Path) -> Resources {
    convert(&load(yaml, dir), &ConvertOptions::default()).unwrap()
}

const SHARED_SECRET: &str = r#"
services:
  api:
    image: registry.local/api:1.0
    secrets: [db-password]
  worker:
    image: registry.local/worker:1.0
    secrets: [db-password]
secrets:
  db-password:
    file: ./db-password.txt
"#;

fn write_secret(dir: &Path) {
    std::fs::write(dir.join("db-password.txt"), "hunter2").unwrap();
}

#[test]
fn story_shared_file_secret_is_generated_once() {
    let dir = tempfile::tempdir().unwrap();
    write_secret(dir.path());
    let resources = run(SHARED_SECRET, dir.path());

    assert_eq!(resources.count(ResourceKind::Secret), 1);
    let secret = resources.secrets().next().unwrap();
    assert_eq!(secret.metadata.name, "db-password-0a32a8f8");

    let mut seen = 0;
    for deployment in resources.deployments() {
        let spec = &deployment.spec.template.spec;
        assert_eq!(
            spec.volumes[0].secret.as_ref().unwrap().secret_name,
            "db-password-0a32a8f8"
        );
        let mount = &spec.containers[0].volume_mounts[0];
        assert_eq!(mount.mount_path, "/run/secrets/db-password");
        assert_eq!(mount.sub_path.as_deref(), Some("db-password.txt"));
        seen += 1;
    }
    assert_eq!(seen, 2);
}

#[test]
fn story_global_service_is_daemon_set() {
    let dir = tempfile::tempdir().unwrap();
    let resources = run(
        r#"
services:
  agent:
    image: agent
    deploy:
      mode: global
  web:
    image: web
    deploy:
      replicas: 3
  api:
    image: api
"#,
        dir.path(),
    );
    assert_eq!(resources.count(ResourceKind::DaemonSet), 1);
    assert_eq!(resources.daemon_sets().next().unwrap().metadata.name, "agent");

    let replicas: Vec<(&str, i32)> = resources
        .deployments()
        .map(|d| (d.metadata.name.as_str(), d.spec.replicas))
        .collect();
    assert_eq!(replicas, vec![("api", 1), ("web", 3)]);
}

#[test]
fn story_run_once_service_is_pod_with_service() {
    let dir = tempfile::tempdir().unwrap();
    let resources = run(
        r#"
services:
  report:
    image: report
    restart: "no"
    ports: ["8080:80"]
"#,
        dir.path(),
    );
    assert_eq!(resources.count(ResourceKind::Deployment), 0);
    let pod = resources.pods().next().unwrap();
    assert_eq!(pod.metadata.name, "report");
    assert_eq!(pod.spec.restart_policy.as_deref(), Some("Never"));

    let service = resources.services().next().unwrap();
    assert_eq!(service.metadata.name, "report");
    assert_eq!(service.spec.ports[0].port, 8080);
    assert_eq!(service.spec.ports[0].target_port, Some(80));
    for (k, v) in &service.spec.selector {
        assert_eq!(pod.metadata.labels.get(k), Some(v));
    }
}

#[test]
fn story_output_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    write_secret(dir.path());
    std::fs::write(dir.path().join("nginx.conf"), "listen 80\n").unwrap();
    let input = r#"
services:
  web:
    image: nginx
    ports: ["80:80"]
    environment:
      Z: "1"
      A: "2"
    volumes:
      - ./nginx.conf:/etc/nginx/nginx.conf
      - cache:/cache
    secrets: [db-password]
    labels:
      lattice.dev/expose: shop.example.com
  api:
    image: api
    secrets: [db-password]
secrets:
  db-password:
    file: ./db-password.txt
volumes:
  cache: {}
"#;
    let first = run(input, dir.path()).to_yaml().unwrap();
    let second = run(input, dir.path()).to_yaml().unwrap();
    assert_eq!(first, second);

    let kinds: Vec<String> = yaml::split_documents(&first)
        .iter()
        .map(|doc| {
            doc.lines()
                .find_map(|l| l.strip_prefix("kind: "))
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "Secret",
            "ConfigMap",
            "PersistentVolumeClaim",
            "Service",
            "Deployment",
            "Deployment",
            "Ingress",
        ]
    );
}

#[test]
fn story_domain_key_bump_only_renames_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    write_secret(dir.path());
    let project = load(SHARED_SECRET, dir.path());

    let v1 = ConvertOptions::default();
    let v2 = ConvertOptions {
        secrets_key: "lattice.secrets.v2".to_string(),
        ..Default::default()
    };
    let out_v1 = convert(&project, &v1).unwrap().to_yaml().unwrap();
    let out_v2 = convert(&project, &v2).unwrap().to_yaml().unwrap();
    assert_ne!(out_v1, out_v2);

    let old = format!("db-password-{}", short_hash(b"hunter2", &v1.secrets_key));
    let new = format!("db-password-{}", short_hash(b"hunter2", &v2.secrets_key));
    assert_eq!(new, "db-password-31c8489a");
    let renamed = out_v1
        .replace(&old, &new)
        .replace(&v1.secrets_key, &v2.secrets_key);
    assert_eq!(renamed, out_v2);
}

#[test]
fn story_repeated_mount_declared_once() {
    let dir = tempfile::tempdir().unwrap();
    let resources = run(
        r#"
services:
  db:
    image: postgres
    volumes:
      - data:/var/lib/postgresql/data
      - data:/var/lib/postgresql/data
volumes:
  data: {}
"#,
        dir.path(),
    );
    let deployment = resources.deployments().next().unwrap();
    let mounts = &deployment.spec.template.spec.containers[0].volume_mounts;
    assert_eq!(mounts.len(), 1);
    assert_eq!(deployment.spec.template.spec.volumes.len(), 1);
}

#[test]
fn story_deploy_condition_makes_always_service_standalone() {
    let dir = tempfile::tempdir().unwrap();
    let resources = run(
        r#"
services:
  job:
    image: job
    restart: always
    deploy:
      restart_policy:
        condition: on-failure
"#,
        dir.path(),
    );
    let pod = resources.pods().next().unwrap();
    assert_eq!(pod.spec.restart_policy.as_deref(), Some("OnFailure"));
}

#[test]
fn story_dangling_mount_keeps_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let resources = run(
        r#"
services:
  web:
    image: nginx
    secrets: [missing]
  api:
    image: api
"#,
        dir.path(),
    );
    assert_eq!(resources.count(ResourceKind::Deployment), 2);
    assert_eq!(resources.diagnostics().len(), 1);
    assert!(resources.diagnostics()[0].contains("missing"));
}

#[test]
fn story_fatal_errors_produce_no_output() {
    let dir = tempfile::tempdir().unwrap();

    let err = convert(
        &load("secrets:\n  s:\n    labels: {}\n", dir.path()),
        &ConvertOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ConversionError::Configuration { ref name, .. } if name == "s"));

    let err = convert(
        &load("secrets:\n  s:\n    file: ./absent\n", dir.path()),
        &ConvertOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ConversionError::Io { .. }));

    let err = convert(
        &load(
            "volumes:\n  v:\n    labels:\n      lattice.dev/volume-size: lots\n",
            dir.path(),
        ),
        &ConvertOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ConversionError::InvalidSize { .. }));

    let err = convert(
        &load(
            "services:\n  web:\n    image: web\n    labels:\n      lattice.dev/ignore: maybe\n",
            dir.path(),
        ),
        &ConvertOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ConversionError::Configuration { .. }));
}

#[test]
fn story_services_colliding_as_dns_labels_fail_the_conversion() {
    let dir = tempfile::tempdir().unwrap();
    let err = convert(
        &load(
            "services:\n  web_api:\n    image: a\n  web-api:\n    image: b\n",
            dir.path(),
        ),
        &ConvertOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ConversionError::Configuration { ref name, .. } if name == "web_api"));
}

#[test]
fn story_options_are_stamped_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let options = ConvertOptions::default()
        .with_namespace("shop")
        .with_label("team", "payments")
        .with_annotation("lattice.dev/version", "0.1.0");
    let project = load(
        r#"
services:
  web:
    image: web
    ports: ["80"]
    labels:
      lattice.dev/expose: "true"
secrets:
  token:
    content: abc
"#,
        dir.path(),
    );
    let resources = convert(&project, &options).unwrap();
    assert_eq!(resources.len(), 4);
    for resource in &resources {
        let meta = resource.metadata();
        assert_eq!(meta.namespace.as_deref(), Some("shop"), "{}", resource.kind());
        assert_eq!(meta.labels["team"], "payments");
        assert_eq!(meta.labels["app.kubernetes.io/managed-by"], "lattice");
        assert_eq!(meta.annotations["lattice.dev/version"], "0.1.0");
    }
    let ingress = resources.ingresses().next().unwrap();
    assert_eq!(ingress.spec.rules[0].host, "web");
}
