//! Content addressing for immutable generated objects
//!
//! Names are `{logical-name}-{hash}` where `hash` is HMAC-SHA256 of the
//! content keyed by a domain key, hex encoded and cut to 8 characters.
//! Bumping the domain key renames every generated object at once.

use std::path::{Path, PathBuf};

use aws_lc_rs::hmac;

use crate::error::{ConversionError, Result};
use crate::project::{FileObjectConfig, Project};

/// Hex characters kept from the digest
pub const SHORT_HASH_LEN: usize = 8;

/// Data key used for inline and environment sourced content
pub const INLINE_CONTENT_KEY: &str = "content";

/// How a secret or config name resolves for mounting
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactMapping {
    /// Generated (or declared external) object name
    pub name: String,
    /// Managed outside the project; no object was generated
    pub external: bool,
    /// Data key to mount as a single file; `None` mounts the whole object
    pub key: Option<String>,
}

/// Logical name to mapping
pub type ArtifactMappings = std::collections::BTreeMap<String, ArtifactMapping>;

/// Keyed short hash of `content`
pub fn short_hash(content: &[u8], domain_key: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, domain_key.as_bytes());
    let tag = hmac::sign(&key, content);
    let mut hex: String = tag.as_ref().iter().map(|b| format!("{:02x}", b)).collect();
    hex.truncate(SHORT_HASH_LEN);
    hex
}

/// Generated object name for `content`
pub fn addressed_name(logical_name: &str, content: &[u8], domain_key: &str) -> String {
    format!("{}-{}", logical_name, short_hash(content, domain_key))
}

/// Read a file and hash it in one step
pub fn read_file_with_short_hash(path: &Path, domain_key: &str) -> Result<(Vec<u8>, String)> {
    let content = std::fs::read(path).map_err(|e| ConversionError::io(path, e))?;
    let hash = short_hash(&content, domain_key);
    Ok((content, hash))
}

/// Content of a secret or config together with the key it is stored under
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedContent {
    /// Data key inside the generated object
    pub key: String,
    /// Raw bytes
    pub bytes: Vec<u8>,
    /// File the content came from, if any
    pub path: Option<PathBuf>,
}

/// Resolve content from inline text, an environment variable or a file, in that order
pub fn resolve_content(
    name: &str,
    object: &FileObjectConfig,
    project: &Project,
) -> Result<ResolvedContent> {
    if let Some(content) = &object.content {
        return Ok(ResolvedContent {
            key: INLINE_CONTENT_KEY.to_string(),
            bytes: content.as_bytes().to_vec(),
            path: None,
        });
    }

    if let Some(variable) = object.environment.as_deref().filter(|v| !v.is_empty()) {
        let value =
            std::env::var(variable).map_err(|_| ConversionError::unresolved(name, variable))?;
        return Ok(ResolvedContent {
            key: INLINE_CONTENT_KEY.to_string(),
            bytes: value.into_bytes(),
            path: None,
        });
    }

    if let Some(file) = object.file.as_deref().filter(|f| !f.is_empty()) {
        let path = project.resolve_path(file);
        let bytes = std::fs::read(&path).map_err(|e| ConversionError::io(&path, e))?;
        return Ok(ResolvedContent {
            key: file_key(&path),
            bytes,
            path: Some(path),
        });
    }

    Err(ConversionError::configuration(
        name,
        "declares neither content, environment nor file",
    ))
}

/// Data key for file content: the file's base name
pub fn file_key(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| INLINE_CONTENT_KEY.to_string())
}
