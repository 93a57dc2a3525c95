//! YAML rendering utilities using serde_yaml
//!
//! Renders typed resources as multi-document YAML manifests. Each resource
//! becomes one self-describing document; documents are joined with `---`.

use serde::Serialize;

/// Document boundary marker placed between rendered resources
pub const DOCUMENT_SEPARATOR: &str = "---\n";

/// Error type for YAML rendering
#[derive(Debug, Clone)]
pub struct YamlError(String);

impl std::fmt::Display for YamlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for YamlError {}

/// Render a single value as one YAML document (no leading separator).
pub fn to_document<T: Serialize>(value: &T) -> Result<String, YamlError> {
    serde_yaml::to_string(value).map_err(|e| YamlError(e.to_string()))
}

/// Render a sequence of values as a multi-document YAML string.
///
/// Returns an empty string for an empty sequence.
pub fn to_multi_document<'a, T, I>(values: I) -> Result<String, YamlError>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let docs = values
        .into_iter()
        .map(to_document)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(docs.join(DOCUMENT_SEPARATOR))
}

/// Split a multi-document YAML string into documents.
///
/// Empty documents (e.g. from a leading separator) are skipped.
pub fn split_documents(input: &str) -> Vec<&str> {
    input
        .split("\n---")
        .map(|doc| doc.trim_start_matches("---").trim_matches('\n'))
        .filter(|doc| !doc.trim().is_empty())
        .collect()
}
