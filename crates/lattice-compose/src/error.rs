//! Error types for project conversion
//!
//! Every fatal error names the logical object (secret, config, volume,
//! service) it came from. Per-mount resolution gaps are not errors: they are
//! logged and recorded as diagnostics on [`crate::Resources`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a whole `convert` call
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Malformed input: missing content source, unparsable directive, etc.
    #[error("configuration error for {name}: {message}")]
    Configuration {
        /// Logical name of the offending object
        name: String,
        /// Description of what is wrong
        message: String,
    },

    /// An environment variable named as a content source does not exist
    #[error("unresolved reference for {name}: environment variable {variable} is not set")]
    UnresolvedReference {
        /// Logical name of the secret or config
        name: String,
        /// The missing variable
        variable: String,
    },

    /// A content file could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// The file that failed to read
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A volume size directive is not a valid quantity
    #[error("invalid size '{size}' for volume {volume}")]
    InvalidSize {
        /// Logical volume name
        volume: String,
        /// The rejected size string
        size: String,
    },

    /// Writing the rendered manifest failed
    #[error("failed to write manifest: {0}")]
    Write(#[source] std::io::Error),

    /// Rendering the output failed
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl ConversionError {
    /// Create a configuration error for a logical object
    pub fn configuration(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create an unresolved environment reference error
    pub fn unresolved(name: impl Into<String>, variable: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            name: name.into(),
            variable: variable.into(),
        }
    }

    /// Wrap an I/O error with the file path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid size error
    pub fn invalid_size(volume: impl Into<String>, size: impl Into<String>) -> Self {
        Self::InvalidSize {
            volume: volume.into(),
            size: size.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }
}

impl From<lattice_common::yaml::YamlError> for ConversionError {
    fn from(e: lattice_common::yaml::YamlError) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Result alias for conversion operations
pub type Result<T, E = ConversionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_object() {
        let err = ConversionError::configuration("db-password", "no content source");
        assert_eq!(
            err.to_string(),
            "configuration error for db-password: no content source"
        );

        let err = ConversionError::unresolved("api-key", "API_KEY");
        assert!(err.to_string().contains("api-key"));
        assert!(err.to_string().contains("API_KEY"));

        let err = ConversionError::invalid_size("data", "lots");
        assert_eq!(err.to_string(), "invalid size 'lots' for volume data");
    }

    #[test]
    fn io_error_includes_path() {
        let err = ConversionError::io(
            "/tmp/missing.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        );
        assert!(err.to_string().contains("/tmp/missing.txt"));
    }
}
