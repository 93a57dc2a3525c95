//! Secret materialization
//!
//! Every declared secret becomes one immutable, content-addressed Secret
//! unless it is external, in which case only the mapping is recorded.

use lattice_common::{LABEL_CONTENT_KEY, LABEL_ORIGINAL_NAME};
use lattice_workload::k8s::Secret;
use lattice_workload::sanitize_dns_label;
use tracing::debug;

use crate::annotations::{self, without_directives, Directives};
use crate::content::{addressed_name, resolve_content, ArtifactMapping, ArtifactMappings};
use crate::error::Result;
use crate::options::ConvertOptions;
use crate::project::{FileObjectConfig, Project};
use crate::resources::Resources;

/// Materializer for top-level secrets
pub struct SecretMaterializer;

impl SecretMaterializer {
    /// Resolve every declared secret, emitting owned ones into `resources`
    pub fn materialize(
        project: &Project,
        options: &ConvertOptions,
        resources: &mut Resources,
    ) -> Result<ArtifactMappings> {
        let mut mappings = ArtifactMappings::new();
        for (name, secret) in &project.secrets {
            let mapping = Self::compile_secret(name, secret, project, options, resources)?;
            debug!(secret = %name, generated = %mapping.name, external = mapping.external, "resolved secret");
            mappings.insert(name.clone(), mapping);
        }
        Ok(mappings)
    }

    fn compile_secret(
        name: &str,
        secret: &FileObjectConfig,
        project: &Project,
        options: &ConvertOptions,
        resources: &mut Resources,
    ) -> Result<ArtifactMapping> {
        let directives = Directives::from_labels(name, &secret.labels);
        let sub_path = directives.get(annotations::SECRET_SUB_PATH);

        if secret.external {
            return Ok(ArtifactMapping {
                name: secret.name.clone().unwrap_or_else(|| name.to_string()),
                external: true,
                key: sub_path.map(str::to_string),
            });
        }

        let content = resolve_content(name, secret, project)?;
        let key = sub_path.map(str::to_string).unwrap_or(content.key);
        let generated = addressed_name(
            &sanitize_dns_label(name),
            &content.bytes,
            &options.secrets_key,
        );

        let metadata = options
            .object_meta(&generated)
            .with_labels(&without_directives(&secret.labels))
            .with_label(LABEL_ORIGINAL_NAME, name)
            .with_label(LABEL_CONTENT_KEY, &options.secrets_key);
        resources.insert(
            Secret::new(metadata)
                .with_bytes(key.clone(), &content.bytes)
                .immutable(),
        );

        Ok(ArtifactMapping {
            name: generated,
            external: false,
            key: Some(key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConversionError;
    use std::io::Write;

    fn project(yaml: &str) -> Project {
        Project::from_yaml(yaml).unwrap()
    }

    #[test]
    fn story_inline_secret_is_content_addressed() {
        let project = project(
            r#"
secrets:
  db-password:
    content: hunter2
    labels:
      team: data
"#,
        );
        let mut resources = Resources::default();
        let mappings =
            SecretMaterializer::materialize(&project, &ConvertOptions::default(), &mut resources)
                .unwrap();

        let mapping = &mappings["db-password"];
        assert_eq!(mapping.name, "db-password-0a32a8f8");
        assert!(!mapping.external);
        assert_eq!(mapping.key.as_deref(), Some("content"));

        let secret = resources.secrets().next().unwrap();
        assert_eq!(secret.metadata.name, "db-password-0a32a8f8");
        assert_eq!(secret.immutable, Some(true));
        assert_eq!(secret.data["content"], "aHVudGVyMg==");
        assert_eq!(secret.metadata.labels[LABEL_ORIGINAL_NAME], "db-password");
        assert_eq!(secret.metadata.labels[LABEL_CONTENT_KEY], "lattice.secrets.v1");
        assert_eq!(secret.metadata.labels["team"], "data");
    }

    #[test]
    fn story_domain_key_bump_renames() {
        let project = project("secrets:\n  db-password:\n    content: hunter2\n");
        let options = ConvertOptions {
            secrets_key: "lattice.secrets.v2".to_string(),
            ..Default::default()
        };
        let mut resources = Resources::default();
        let mappings = SecretMaterializer::materialize(&project, &options, &mut resources).unwrap();
        assert_eq!(mappings["db-password"].name, "db-password-31c8489a");
    }

    #[test]
    fn story_file_secret_keyed_by_basename() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("token.txt")).unwrap();
        f.write_all(b"hunter2").unwrap();

        let project = project("secrets:\n  token:\n    file: ./token.txt\n")
            .with_default_working_dir(dir.path());
        let mut resources = Resources::default();
        let mappings =
            SecretMaterializer::materialize(&project, &ConvertOptions::default(), &mut resources)
                .unwrap();
        assert_eq!(mappings["token"].name, "token-0a32a8f8");
        assert_eq!(mappings["token"].key.as_deref(), Some("token.txt"));
    }

    #[test]
    fn story_sub_path_directive_overrides_key() {
        let project = project(
            r#"
secrets:
  tls:
    content: cert
    labels:
      lattice.dev/secret-sub-path: tls.crt
"#,
        );
        let mut resources = Resources::default();
        let mappings =
            SecretMaterializer::materialize(&project, &ConvertOptions::default(), &mut resources)
                .unwrap();
        assert_eq!(mappings["tls"].key.as_deref(), Some("tls.crt"));
        let secret = resources.secrets().next().unwrap();
        assert!(secret.data.contains_key("tls.crt"));
        assert!(!secret.metadata.labels.contains_key(annotations::SECRET_SUB_PATH));
    }

    #[test]
    fn story_external_secret_is_not_generated() {
        let project = project(
            r#"
secrets:
  vault:
    external: true
    name: prod-vault-token
"#,
        );
        let mut resources = Resources::default();
        let mappings =
            SecretMaterializer::materialize(&project, &ConvertOptions::default(), &mut resources)
                .unwrap();
        assert!(resources.is_empty());
        assert_eq!(
            mappings["vault"],
            ArtifactMapping {
                name: "prod-vault-token".to_string(),
                external: true,
                key: None,
            }
        );
    }

    #[test]
    fn story_missing_environment_variable_is_fatal() {
        let project = project(
            "secrets:\n  api-key:\n    environment: LATTICE_TEST_SURELY_UNSET_VARIABLE\n",
        );
        let mut resources = Resources::default();
        let err =
            SecretMaterializer::materialize(&project, &ConvertOptions::default(), &mut resources)
                .unwrap_err();
        assert!(matches!(err, ConversionError::UnresolvedReference { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let project = project("secrets:\n  gone:\n    file: ./nope\n")
            .with_default_working_dir(dir.path());
        let mut resources = Resources::default();
        let err =
            SecretMaterializer::materialize(&project, &ConvertOptions::default(), &mut resources)
                .unwrap_err();
        assert!(matches!(err, ConversionError::Io { .. }));
    }
}
