//! Config materialization
//!
//! Declared configs and bind-mounted regular files both become immutable,
//! content-addressed ConfigMaps named with the configs domain key.

use std::path::Path;

use lattice_common::{ANNOTATION_SOURCE_PATH, LABEL_CONTENT_KEY, LABEL_ORIGINAL_NAME};
use lattice_workload::k8s::ConfigMap;
use lattice_workload::sanitize_dns_label;
use tracing::debug;

use crate::annotations::without_directives;
use crate::content::{
    addressed_name, file_key, read_file_with_short_hash, resolve_content, ArtifactMapping,
    ArtifactMappings,
};
use crate::error::Result;
use crate::options::ConvertOptions;
use crate::project::{FileObjectConfig, Project};
use crate::resources::Resources;

/// Materializer for top-level configs and baked bind-mount files
pub struct ConfigMaterializer;

impl ConfigMaterializer {
    /// Resolve every declared config, emitting owned ones into `resources`
    pub fn materialize(
        project: &Project,
        options: &ConvertOptions,
        resources: &mut Resources,
    ) -> Result<ArtifactMappings> {
        let mut mappings = ArtifactMappings::new();
        for (name, config) in &project.configs {
            let mapping = Self::compile_config(name, config, project, options, resources)?;
            debug!(config = %name, generated = %mapping.name, external = mapping.external, "resolved config");
            mappings.insert(name.clone(), mapping);
        }
        Ok(mappings)
    }

    fn compile_config(
        name: &str,
        config: &FileObjectConfig,
        project: &Project,
        options: &ConvertOptions,
        resources: &mut Resources,
    ) -> Result<ArtifactMapping> {
        if config.external {
            return Ok(ArtifactMapping {
                name: config.name.clone().unwrap_or_else(|| name.to_string()),
                external: true,
                key: None,
            });
        }

        let content = resolve_content(name, config, project)?;
        let generated = addressed_name(
            &sanitize_dns_label(name),
            &content.bytes,
            &options.configs_key,
        );
        let metadata = options
            .object_meta(&generated)
            .with_labels(&without_directives(&config.labels))
            .with_label(LABEL_ORIGINAL_NAME, name)
            .with_label(LABEL_CONTENT_KEY, &options.configs_key);
        resources.insert(
            ConfigMap::new(metadata)
                .with_bytes(content.key.clone(), &content.bytes)
                .immutable(),
        );

        Ok(ArtifactMapping {
            name: generated,
            external: false,
            key: Some(content.key),
        })
    }

    /// Bake a regular file bind-mounted into `service` as a ConfigMap.
    ///
    /// The logical name is `{service}-{basename}`; the generated object
    /// records the source path relative to the project's working directory.
    pub fn bake_file(
        service: &str,
        path: &Path,
        project: &Project,
        options: &ConvertOptions,
        resources: &mut Resources,
    ) -> Result<ArtifactMapping> {
        let key = file_key(path);
        let logical = sanitize_dns_label(&format!("{}-{}", service, key));
        let (bytes, hash) = read_file_with_short_hash(path, &options.configs_key)?;
        let generated = format!("{}-{}", logical, hash);

        let metadata = options
            .object_meta(&generated)
            .with_label(LABEL_ORIGINAL_NAME, &logical)
            .with_label(LABEL_CONTENT_KEY, &options.configs_key)
            .with_annotation(ANNOTATION_SOURCE_PATH, project.relative_path(path));
        if resources.insert(ConfigMap::new(metadata).with_bytes(key.clone(), &bytes).immutable()) {
            debug!(service = %service, path = %path.display(), generated = %generated, "baked bind mount");
        }

        Ok(ArtifactMapping {
            name: generated,
            external: false,
            key: Some(key),
        })
    }
}
