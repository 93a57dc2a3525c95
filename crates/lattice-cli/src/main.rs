//! Lattice CLI
//!
//! Converts compose projects into Kubernetes manifests.

use clap::Parser;

use lattice_cli::{Cli, Result};
use lattice_common::telemetry::init_logging;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.telemetry())?;
    cli.run()
}
