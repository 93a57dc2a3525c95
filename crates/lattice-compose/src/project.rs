//! Resolved project model
//!
//! The input to [`crate::convert`]: services, secrets, configs and volumes
//! after interpolation and profile filtering. Every name-keyed collection is a
//! `BTreeMap` so iteration is always sorted by name.
//!
//! The model deserializes from YAML or JSON. Fields accept both the long and
//! the short compose syntax where a loader would commonly leave either
//! (`"8080:80/udp"` ports, `"data:/var/lib/data:ro"` volumes, list or map
//! labels and environment).

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

// =============================================================================
// Project
// =============================================================================

/// A fully resolved multi-service project
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Project {
    /// Project name
    pub name: Option<String>,
    /// Directory relative file references are resolved against
    pub working_dir: Option<PathBuf>,
    /// Services by name
    pub services: BTreeMap<String, ServiceConfig>,
    /// Secrets by name
    pub secrets: BTreeMap<String, FileObjectConfig>,
    /// Configs by name
    pub configs: BTreeMap<String, FileObjectConfig>,
    /// Named volumes by name
    pub volumes: BTreeMap<String, VolumeConfig>,
}

impl Project {
    /// Parse a project from YAML (JSON is accepted as a YAML subset)
    pub fn from_yaml(input: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(input)
    }

    /// Parse a project from JSON
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// Set the working directory unless the model already declares one
    pub fn with_default_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        if self.working_dir.is_none() {
            self.working_dir = Some(dir.into());
        }
        self
    }

    /// Resolve a file reference against the working directory
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        match &self.working_dir {
            Some(dir) if p.is_relative() => dir.join(p),
            _ => p.to_path_buf(),
        }
    }

    /// Express a path relative to the working directory when it lies below it
    pub fn relative_path(&self, path: &Path) -> String {
        self.working_dir
            .as_ref()
            .and_then(|dir| path.strip_prefix(dir).ok())
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}

// =============================================================================
// Top-level objects
// =============================================================================

/// A secret or config declaration
///
/// Content comes from exactly one of `content`, `environment` or `file`,
/// checked in that order. `external` objects are managed outside the project.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileObjectConfig {
    /// Name of the object outside the project (used when external)
    pub name: Option<String>,
    /// Inline content
    pub content: Option<String>,
    /// Environment variable holding the content
    pub environment: Option<String>,
    /// File holding the content
    pub file: Option<String>,
    /// Managed outside the project
    #[serde(deserialize_with = "external_flag")]
    pub external: bool,
    /// Labels
    #[serde(deserialize_with = "key_values")]
    pub labels: BTreeMap<String, String>,
}

/// A named volume declaration
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Name of the volume outside the project (used when external)
    pub name: Option<String>,
    /// Volume driver
    pub driver: Option<String>,
    /// Driver options
    #[serde(deserialize_with = "key_values")]
    pub driver_opts: BTreeMap<String, String>,
    /// Managed outside the project
    #[serde(deserialize_with = "external_flag")]
    pub external: bool,
    /// Labels
    #[serde(deserialize_with = "key_values")]
    pub labels: BTreeMap<String, String>,
}

// =============================================================================
// Services
// =============================================================================

/// A service definition
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Container image
    pub image: Option<String>,
    /// Entrypoint override
    #[serde(deserialize_with = "command_line")]
    pub entrypoint: Option<Vec<String>>,
    /// Command override
    #[serde(deserialize_with = "command_line")]
    pub command: Option<Vec<String>>,
    /// Working directory inside the container
    pub working_dir: Option<String>,
    /// Environment; a `None` value declares the variable without a value
    #[serde(deserialize_with = "environment")]
    pub environment: BTreeMap<String, Option<String>>,
    /// Published and exposed ports
    pub ports: Vec<PortConfig>,
    /// Mounts of named volumes, bind paths, tmpfs and images
    pub volumes: Vec<ServiceVolumeConfig>,
    /// Secret references
    pub secrets: Vec<FileReference>,
    /// Config references
    pub configs: Vec<FileReference>,
    /// Memory-backed mount paths
    #[serde(deserialize_with = "one_or_many")]
    pub tmpfs: Vec<String>,
    /// Health check
    pub healthcheck: Option<HealthCheckConfig>,
    /// Deploy metadata
    pub deploy: Option<DeployConfig>,
    /// Labels; `lattice.dev/` keys are directives
    #[serde(deserialize_with = "key_values")]
    pub labels: BTreeMap<String, String>,
    /// Annotations; `lattice.dev/` keys are directives
    #[serde(deserialize_with = "key_values")]
    pub annotations: BTreeMap<String, String>,
    /// `uid[:gid]`
    #[serde(deserialize_with = "optional_scalar")]
    pub user: Option<String>,
    /// Supplemental groups
    #[serde(deserialize_with = "scalar_list")]
    pub group_add: Vec<String>,
    /// Compose restart string (always, no, on-failure[:N], unless-stopped)
    pub restart: Option<String>,
    /// Image pull policy (always, never, missing, if_not_present, build)
    pub pull_policy: Option<String>,
    /// Privileged mode
    pub privileged: bool,
    /// Read-only root filesystem
    pub read_only: bool,
    /// Capabilities to add
    pub cap_add: Vec<String>,
    /// Capabilities to drop
    pub cap_drop: Vec<String>,
}

/// A declared port
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortConfig {
    /// Port name
    pub name: Option<String>,
    /// Container port
    pub target: u16,
    /// Published (host) port
    pub published: Option<u16>,
    /// Protocol as declared (tcp, udp, sctp)
    pub protocol: Option<String>,
}

impl PortConfig {
    /// Protocol upper-cased, defaulting to TCP
    pub fn protocol_or_default(&self) -> String {
        self.protocol
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| "TCP".to_string())
    }

    /// Declared name, else `{protocol}-{target}`
    pub fn port_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!(
                "{}-{}",
                self.protocol_or_default().to_ascii_lowercase(),
                self.target
            ),
        }
    }

    /// Parse the short syntax: `[[ip:]published:]target[/protocol]`
    pub fn parse_short(spec: &str) -> Result<Self, String> {
        let (ports, protocol) = match spec.split_once('/') {
            Some((ports, proto)) => (ports, Some(proto.to_string())),
            None => (spec, None),
        };
        let parts: Vec<&str> = ports.rsplitn(3, ':').collect();
        let target = parse_port_range_start(parts[0])?;
        let published = match parts.get(1) {
            Some(p) if !p.is_empty() => Some(parse_port_range_start(p)?),
            _ => None,
        };
        Ok(Self {
            name: None,
            target,
            published,
            protocol,
        })
    }
}

/// Parse a port or the first port of a `start-end` range
fn parse_port_range_start(s: &str) -> Result<u16, String> {
    let first = s.split('-').next().unwrap_or(s).trim();
    first
        .parse::<u16>()
        .map_err(|_| format!("invalid port '{}'", s))
}

impl<'de> Deserialize<'de> for PortConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Long {
            name: Option<String>,
            target: Scalar,
            #[serde(default)]
            published: Option<Scalar>,
            #[serde(default)]
            protocol: Option<String>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Long(Long),
            Short(Scalar),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Short(s) => PortConfig::parse_short(&s.to_string()).map_err(serde::de::Error::custom),
            Repr::Long(long) => {
                let target =
                    parse_port_range_start(&long.target.to_string()).map_err(serde::de::Error::custom)?;
                let published = match long.published {
                    Some(p) if !p.to_string().is_empty() => Some(
                        parse_port_range_start(&p.to_string()).map_err(serde::de::Error::custom)?,
                    ),
                    _ => None,
                };
                Ok(PortConfig {
                    name: long.name,
                    target,
                    published,
                    protocol: long.protocol,
                })
            }
        }
    }
}

/// Kind of a service mount
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MountKind {
    /// Named (or anonymous) volume
    Volume,
    /// Host path, or a local file to bake into a ConfigMap
    Bind,
    /// Memory-backed scratch space
    Tmpfs,
    /// OCI image contents
    Image,
    /// Anything else (npipe, cluster, ...)
    Unknown(String),
}

/// A service mount
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceVolumeConfig {
    /// Mount type as declared
    pub r#type: String,
    /// Volume name, host path or image reference
    pub source: Option<String>,
    /// Path inside the container
    pub target: String,
    /// Mount read-only
    pub read_only: bool,
    /// Sub path inside the source
    pub subpath: Option<String>,
}

impl ServiceVolumeConfig {
    /// The mount kind
    pub fn kind(&self) -> MountKind {
        match self.r#type.as_str() {
            "volume" | "" => MountKind::Volume,
            "bind" => MountKind::Bind,
            "tmpfs" => MountKind::Tmpfs,
            "image" => MountKind::Image,
            other => MountKind::Unknown(other.to_string()),
        }
    }

    /// Parse the short syntax: `[source:]target[:mode]`
    pub fn parse_short(spec: &str) -> Self {
        let parts: Vec<&str> = spec.split(':').collect();
        let (source, target, mode) = match parts.as_slice() {
            [target] => (None, *target, None),
            [source, target] => (Some(*source), *target, None),
            [source, target, mode, ..] => (Some(*source), *target, Some(*mode)),
            [] => (None, "", None),
        };
        let is_path = source
            .map(|s| s.starts_with('.') || s.starts_with('/') || s.starts_with('~'))
            .unwrap_or(false);
        Self {
            r#type: if is_path { "bind" } else { "volume" }.to_string(),
            source: source.map(str::to_string),
            target: target.to_string(),
            read_only: mode
                .map(|m| m.split(',').any(|o| o == "ro"))
                .unwrap_or(false),
            subpath: None,
        }
    }
}

impl<'de> Deserialize<'de> for ServiceVolumeConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct SubPath {
            subpath: Option<String>,
        }

        #[derive(Deserialize)]
        struct Long {
            #[serde(rename = "type", default)]
            type_: String,
            #[serde(default)]
            source: Option<String>,
            #[serde(default)]
            target: String,
            #[serde(default)]
            read_only: bool,
            #[serde(default)]
            volume: Option<SubPath>,
            #[serde(default)]
            image: Option<SubPath>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Short(String),
            Long(Long),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Short(s) => ServiceVolumeConfig::parse_short(&s),
            Repr::Long(long) => ServiceVolumeConfig {
                r#type: long.type_,
                source: long.source.filter(|s| !s.is_empty()),
                target: long.target,
                read_only: long.read_only,
                subpath: long
                    .volume
                    .and_then(|v| v.subpath)
                    .or_else(|| long.image.and_then(|i| i.subpath)),
            },
        })
    }
}

/// A service reference to a secret or config
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileReference {
    /// Name of the secret or config
    pub source: String,
    /// Path inside the container
    pub target: Option<String>,
}

impl<'de> Deserialize<'de> for FileReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Long {
            source: String,
            #[serde(default)]
            target: Option<String>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Short(String),
            Long(Long),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Short(source) => FileReference {
                source,
                target: None,
            },
            Repr::Long(long) => FileReference {
                source: long.source,
                target: long.target.filter(|t| !t.is_empty()),
            },
        })
    }
}

/// Health check
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Test command; a plain string is treated as `CMD-SHELL`
    #[serde(deserialize_with = "health_test")]
    pub test: Vec<String>,
    /// Interval between checks
    #[serde(deserialize_with = "optional_duration")]
    pub interval: Option<Duration>,
    /// Timeout of one check
    #[serde(deserialize_with = "optional_duration")]
    pub timeout: Option<Duration>,
    /// Grace period after start
    #[serde(deserialize_with = "optional_duration")]
    pub start_period: Option<Duration>,
    /// Consecutive failures before unhealthy
    pub retries: Option<u32>,
    /// Disable health checking
    pub disable: bool,
}

impl HealthCheckConfig {
    /// Disabled explicitly or with a `NONE` test
    pub fn is_disabled(&self) -> bool {
        self.disable || self.test.first().map(String::as_str) == Some("NONE")
    }
}

/// Deploy metadata
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// `replicated` (default) or `global`
    pub mode: Option<String>,
    /// Replica count
    pub replicas: Option<i32>,
    /// Restart policy
    pub restart_policy: Option<RestartPolicyConfig>,
    /// Resource limits and reservations
    pub resources: Option<DeployResources>,
    /// Rolling update configuration
    pub update_config: Option<UpdateConfig>,
}

impl DeployConfig {
    /// Deploy mode is `global`
    pub fn is_global(&self) -> bool {
        self.mode.as_deref() == Some("global")
    }
}

/// Deploy restart policy
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RestartPolicyConfig {
    /// `none`, `on-failure` or `any`
    pub condition: Option<String>,
}

/// Deploy resources
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeployResources {
    /// Limits
    pub limits: Option<ResourceSpec>,
    /// Reservations (requests)
    pub reservations: Option<ResourceSpec>,
}

/// CPU and memory amounts
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    /// CPUs as nanocpus (fractional cores × 1e9)
    #[serde(rename = "cpus", deserialize_with = "nano_cpus")]
    pub nano_cpus: Option<i64>,
    /// Memory in bytes
    #[serde(rename = "memory", deserialize_with = "memory_bytes")]
    pub memory_bytes: Option<i64>,
}

/// Rolling update configuration
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Containers updated at once
    pub parallelism: Option<i32>,
    /// `stop-first` or `start-first`
    pub order: Option<String>,
}

// =============================================================================
// Scalars and parsers
// =============================================================================

/// A YAML/JSON scalar read as text
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Str(s) => f.write_str(s),
        }
    }
}

/// Parse a compose duration: `1h2m3s`, `1m30s`, `500ms`, `1.5s`, or bare seconds
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<f64>() {
        return duration_from_secs(secs, input);
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration '{}'", input))?;
        if num_len == 0 {
            return Err(format!("invalid duration '{}'", input));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| format!("invalid duration '{}'", input))?;
        rest = &rest[num_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let factor = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 1e-3,
            "us" | "µs" => 1e-6,
            "ns" => 1e-9,
            unit => return Err(format!("unknown unit '{}' in duration '{}'", unit, input)),
        };
        total += value * factor;
        rest = &rest[unit_len..];
    }
    duration_from_secs(total, input)
}

fn duration_from_secs(secs: f64, input: &str) -> Result<Duration, String> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("invalid duration '{}'", input));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Parse a byte size: plain bytes or a `b/k/m/g` (optionally `kb`, `mi`, ...) suffix
pub fn parse_bytes(input: &str) -> Result<i64, String> {
    let s = input.trim().to_ascii_lowercase();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num
        .parse()
        .map_err(|_| format!("invalid byte size '{}'", input))?;
    let factor: f64 = match unit.trim() {
        "" | "b" => 1.0,
        "k" | "kb" | "ki" | "kib" => 1024.0,
        "m" | "mb" | "mi" | "mib" => 1024.0 * 1024.0,
        "g" | "gb" | "gi" | "gib" => 1024.0 * 1024.0 * 1024.0,
        "t" | "tb" | "ti" | "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return Err(format!("invalid byte size '{}'", input)),
    };
    Ok((value * factor) as i64)
}

fn optional_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    match Option::<Scalar>::deserialize(d)? {
        None => Ok(None),
        Some(s) => parse_duration(&s.to_string())
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn nano_cpus<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    match Option::<Scalar>::deserialize(d)? {
        None => Ok(None),
        Some(s) => {
            let cores: f64 = s
                .to_string()
                .trim()
                .parse()
                .map_err(|_| serde::de::Error::custom(format!("invalid cpus '{}'", s)))?;
            Ok(Some((cores * 1e9).round() as i64))
        }
    }
}

fn memory_bytes<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    match Option::<Scalar>::deserialize(d)? {
        None => Ok(None),
        Some(s) => parse_bytes(&s.to_string())
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn optional_scalar<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(d)?.map(|s| s.to_string()))
}

fn scalar_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<Scalar>>::deserialize(d)?
        .unwrap_or_default()
        .into_iter()
        .map(|s| s.to_string())
        .collect())
}

fn one_or_many<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<Repr>::deserialize(d)? {
        None => Vec::new(),
        Some(Repr::One(s)) => vec![s],
        Some(Repr::Many(v)) => v,
    })
}

fn command_line<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<String>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Line(String),
        Argv(Vec<String>),
    }
    Ok(match Option::<Repr>::deserialize(d)? {
        None => None,
        Some(Repr::Line(line)) => Some(crate::workload::probes::split_shell_words(&line)),
        Some(Repr::Argv(argv)) => Some(argv),
    })
}

fn health_test<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Shell(String),
        Argv(Vec<String>),
    }
    Ok(match Option::<Repr>::deserialize(d)? {
        None => Vec::new(),
        Some(Repr::Shell(s)) => vec!["CMD-SHELL".to_string(), s],
        Some(Repr::Argv(v)) => v,
    })
}

fn external_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    // Older files write `external: { name: ... }`
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Flag(bool),
        Named(serde_json::Value),
    }
    Ok(match Option::<Repr>::deserialize(d)? {
        None => false,
        Some(Repr::Flag(b)) => b,
        Some(Repr::Named(_)) => true,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyValues {
    Map(BTreeMap<String, Option<Scalar>>),
    List(Vec<String>),
}

impl KeyValues {
    fn into_optional_map(self) -> BTreeMap<String, Option<String>> {
        match self {
            KeyValues::Map(map) => map
                .into_iter()
                .map(|(k, v)| (k, v.map(|s| s.to_string())))
                .collect(),
            KeyValues::List(items) => items
                .into_iter()
                .map(|item| match item.split_once('=') {
                    Some((k, v)) => (k.to_string(), Some(v.to_string())),
                    None => (item, None),
                })
                .collect(),
        }
    }
}

fn key_values<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, String>, D::Error> {
    Ok(Option::<KeyValues>::deserialize(d)?
        .map(KeyValues::into_optional_map)
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.unwrap_or_default()))
        .collect())
}

fn environment<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<BTreeMap<String, Option<String>>, D::Error> {
    Ok(Option::<KeyValues>::deserialize(d)?
        .map(KeyValues::into_optional_map)
        .unwrap_or_default())
}
