//! Version command

use crate::Result;

/// Version line printed by `lattice version`
pub fn version_line() -> String {
    format!("lattice {}", env!("CARGO_PKG_VERSION"))
}

pub fn run() -> Result<()> {
    println!("{}", version_line());
    Ok(())
}
