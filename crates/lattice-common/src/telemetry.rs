//! Logging initialization for Lattice command-line tools
//!
//! Provides one place to set up `tracing`:
//! - `RUST_LOG`-style filtering via `EnvFilter`, falling back to a configured level
//! - Human-readable or JSON structured output
//! - Output on stderr so stdout stays reserved for generated manifests

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured filter directive could not be parsed
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter {
        /// The filter string that failed to parse
        filter: String,
        /// Parser error message
        message: String,
    },

    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Default filter used when `RUST_LOG` is not set (e.g. "info", "lattice_compose=debug")
    pub default_filter: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            json: false,
        }
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise the configured default
fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.default_filter).map_err(|e| TelemetryError::InvalidFilter {
        filter: config.default_filter.clone(),
        message: e.to_string(),
    })
}

/// Initialize logging with the given configuration
///
/// # Example
///
/// ```ignore
/// use lattice_common::telemetry::{init_logging, TelemetryConfig};
///
/// init_logging(TelemetryConfig {
///     default_filter: "debug".to_string(),
///     ..Default::default()
/// })?;
/// ```
pub fn init_logging(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = build_filter(&config)?;

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
    });
    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })?;

    Ok(())
}
