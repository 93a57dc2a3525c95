//! Lattice CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};
use lattice_common::telemetry::TelemetryConfig;

/// Lattice - compose projects to Kubernetes manifests
#[derive(Parser, Debug)]
#[command(name = "lattice")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset (e.g. "debug", "lattice_compose=trace")
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert a project file into Kubernetes manifests on stdout
    Convert(commands::convert::ConvertArgs),
    /// Print version information
    Version,
}

impl Cli {
    /// Logging settings requested on the command line
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            default_filter: self.log_level.clone(),
            json: self.log_json,
        }
    }

    /// Run the CLI command
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Convert(args) => commands::convert::run(args),
            Commands::Version => commands::version::run(),
        }
    }
}
