//! Convert command

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use clap::Args;
use lattice_common::{ANNOTATION_VERSION, LABEL_MANAGED_BY, LABEL_MANAGED_BY_LATTICE};
use lattice_compose::options::{DEFAULT_CONFIGS_KEY, DEFAULT_SECRETS_KEY, DEFAULT_VOLUME_SIZE};
use lattice_compose::{convert, ConvertOptions, Project};
use tracing::{info, warn};

use super::parse_key_value;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Resolved project file (YAML or JSON), `-` for stdin
    #[arg(short = 'f', long = "file", default_value = "compose.yaml")]
    pub file: PathBuf,

    /// Namespace stamped on every generated object
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Extra label for every generated object (repeatable)
    #[arg(long = "label", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub labels: Vec<(String, String)>,

    /// Extra annotation for every generated object (repeatable)
    #[arg(long = "annotation", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub annotations: Vec<(String, String)>,

    /// Key for secret name hashes; bumping it renames every generated secret
    #[arg(long, default_value = DEFAULT_SECRETS_KEY)]
    pub secrets_key: String,

    /// Key for config name hashes; bumping it renames every generated config
    #[arg(long, default_value = DEFAULT_CONFIGS_KEY)]
    pub configs_key: String,

    /// Claim size for volumes without a size directive
    #[arg(long, default_value = DEFAULT_VOLUME_SIZE)]
    pub volume_size: String,
}

impl ConvertArgs {
    fn is_stdin(&self) -> bool {
        self.file.as_os_str() == "-"
    }

    /// Conversion options, with the management label and tool version stamped
    pub fn options(&self) -> ConvertOptions {
        let mut options = ConvertOptions {
            secrets_key: self.secrets_key.clone(),
            configs_key: self.configs_key.clone(),
            default_volume_size: self.volume_size.clone(),
            namespace: self.namespace.clone(),
            ..Default::default()
        }
        .with_label(LABEL_MANAGED_BY, LABEL_MANAGED_BY_LATTICE)
        .with_annotation(ANNOTATION_VERSION, env!("CARGO_PKG_VERSION"));
        for (k, v) in &self.labels {
            options = options.with_label(k, v);
        }
        for (k, v) in &self.annotations {
            options = options.with_annotation(k, v);
        }
        options
    }
}

pub fn run(args: ConvertArgs) -> Result<()> {
    let stdout = std::io::stdout();
    run_with_writer(&args, stdout.lock())
}

/// Convert and write the manifest; nothing is written when conversion fails
pub fn run_with_writer<W: Write>(args: &ConvertArgs, writer: W) -> Result<()> {
    let project = load_project(args)?;
    let resources = convert(&project, &args.options())?;

    for diagnostic in resources.diagnostics() {
        warn!(diagnostic = %diagnostic, "skipped during conversion");
    }
    resources.write(writer)?;
    info!(
        objects = resources.len(),
        skipped = resources.diagnostics().len(),
        "manifest written"
    );
    Ok(())
}

/// Read and parse the project; relative paths resolve against the file's directory
pub fn load_project(args: &ConvertArgs) -> Result<Project> {
    let (input, base_dir) = if args.is_stdin() {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        (input, std::env::current_dir()?)
    } else {
        let input = std::fs::read_to_string(&args.file)
            .map_err(|e| Error::project_file(&args.file, e))?;
        (input, base_dir(&args.file)?)
    };

    let project = if is_json(&args.file) {
        Project::from_json(&input)?
    } else {
        Project::from_yaml(&input)?
    };
    Ok(project.with_default_working_dir(base_dir))
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn base_dir(file: &Path) -> Result<PathBuf> {
    match file.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => Ok(parent.to_path_buf()),
        None => Ok(std::env::current_dir()?),
    }
}
