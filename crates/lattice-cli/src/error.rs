//! Error types for the CLI

use std::path::PathBuf;

use lattice_common::telemetry::TelemetryError;
use lattice_compose::ConversionError;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("cannot read project file {path}: {source}")]
    ProjectFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn project_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::ProjectFile {
            path: path.into(),
            source,
        }
    }
}
