//! Manifest discovery and validation.
//!
//! Modules live under `<root>/<type-dir>/<module-dir>/manifest.yaml`, where
//! `<type-dir>` is one of `orchestrators`, `analyzers`, `executors` or
//! `integrations`. Discovery never aborts on a single bad module: failures are
//! collected per module directory and returned next to the good manifests.

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::ManifestError;
use crate::modules::schema::ConfigSchema;
use crate::types::{EntryPoint, ModuleId, TaskType};

pub const MANIFEST_FILE: &str = "manifest.yaml";

/// Capability tag matching any task type.
pub const WILDCARD_CAPABILITY: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Orchestrator,
    Analyzer,
    Executor,
    Integration,
}

impl ModuleType {
    pub const ALL: [ModuleType; 4] = [
        ModuleType::Orchestrator,
        ModuleType::Analyzer,
        ModuleType::Executor,
        ModuleType::Integration,
    ];

    /// Subdirectory of the modules root holding modules of this type.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrators",
            Self::Analyzer => "analyzers",
            Self::Executor => "executors",
            Self::Integration => "integrations",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Analyzer => "analyzer",
            Self::Executor => "executor",
            Self::Integration => "integration",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown module type `{}`", s))
    }
}

/// A declared dependency, written either as a bare id or as `{id, version}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dependency {
    Any(ModuleId),
    Ranged {
        id: ModuleId,
        #[serde(default)]
        version: Option<String>,
    },
}

impl Dependency {
    pub fn id(&self) -> &ModuleId {
        match self {
            Self::Any(id) | Self::Ranged { id, .. } => id,
        }
    }

    /// Raw version range, `None` meaning any version.
    pub fn version_range(&self) -> Option<&str> {
        match self {
            Self::Any(_) => None,
            Self::Ranged { version, .. } => version.as_deref(),
        }
    }

    /// Parsed version requirement; `*` when none was declared.
    pub fn requirement(&self) -> Result<VersionReq, semver::Error> {
        match self.version_range() {
            Some(range) => VersionReq::parse(range),
            None => Ok(VersionReq::STAR),
        }
    }
}

/// Declarative description of a module, as read from `manifest.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub id: ModuleId,
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    #[serde(default)]
    pub description: String,
    pub entry_point: EntryPoint,
    /// Router ordering; higher values are asked first.
    #[serde(default)]
    pub priority: i32,
    /// Task-type tags this module accepts. `*` accepts every type.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub config_schema: ConfigSchema,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Directory the manifest was read from.
    #[serde(skip)]
    pub path: PathBuf,
    /// SHA-256 of the manifest file contents.
    #[serde(skip)]
    pub fingerprint: String,
}

impl ModuleManifest {
    /// Parse manifest text. `dir` is recorded as the module's directory.
    pub fn from_yaml(text: &str, dir: &Path) -> Result<Self, ManifestError> {
        let mut manifest: ModuleManifest =
            serde_yaml::from_str(text).map_err(|e| ManifestError::Parse {
                path: dir.join(MANIFEST_FILE),
                message: e.to_string(),
            })?;
        manifest.path = dir.to_path_buf();
        manifest.fingerprint = fingerprint(text);
        Ok(manifest)
    }

    pub fn parsed_version(&self) -> Result<Version, semver::Error> {
        Version::parse(&self.version)
    }

    /// True if any capability tag matches the task type.
    pub fn accepts(&self, task_type: &TaskType) -> bool {
        self.capabilities.contains(WILDCARD_CAPABILITY)
            || self.capabilities.contains(task_type.as_str())
    }

    /// Configuration with schema defaults applied.
    pub fn resolved_config(&self) -> Result<Map<String, Value>, String> {
        self.config_schema.resolve(&self.config)
    }
}

fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A module directory that could not be turned into a valid manifest.
#[derive(Debug, Clone)]
pub struct DiscoveryError {
    /// Manifest id when it could be read, otherwise the directory name.
    pub module: String,
    pub path: PathBuf,
    pub error: ManifestError,
}

/// Outcome of a discovery scan.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub manifests: Vec<ModuleManifest>,
    pub errors: Vec<DiscoveryError>,
}

/// Walk the type subdirectories under `root` and parse one manifest per module
/// directory. Manifests are validated against each other for id uniqueness;
/// the first one found (in directory-name order) keeps the id.
pub fn discover(root: &Path) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();
    let mut seen: BTreeMap<ModuleId, PathBuf> = BTreeMap::new();

    for module_type in ModuleType::ALL {
        let type_dir = root.join(module_type.dir_name());
        let Ok(read_dir) = fs::read_dir(&type_dir) else {
            debug!("Skipping missing module type directory {}", type_dir.display());
            continue;
        };

        let mut dirs: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir() && path.join(MANIFEST_FILE).exists())
            .collect();
        dirs.sort();

        for dir in dirs {
            let outcome = load_manifest(&dir)
                .and_then(|manifest| check_type_dir(&manifest, module_type).map(|_| manifest))
                .and_then(|manifest| validate(&manifest, &seen).map(|_| manifest));

            match outcome {
                Ok(manifest) => {
                    info!(
                        "Found module: {} ({}) v{}",
                        manifest.id, manifest.name, manifest.version
                    );
                    seen.insert(manifest.id.clone(), manifest.path.clone());
                    report.manifests.push(manifest);
                }
                Err(error) => {
                    let module = module_label(&dir, &error);
                    warn!("Discovery error for module {}: {}", module, error);
                    report.errors.push(DiscoveryError {
                        module,
                        path: dir,
                        error,
                    });
                }
            }
        }
    }

    report
}

/// A manifest must live under the directory for the type it declares.
fn check_type_dir(manifest: &ModuleManifest, dir_type: ModuleType) -> Result<(), ManifestError> {
    if manifest.module_type == dir_type {
        return Ok(());
    }
    Err(ManifestError::validation(
        manifest.id.as_str(),
        format!(
            "declares type `{}` but was found under `{}/`",
            manifest.module_type,
            dir_type.dir_name()
        ),
    ))
}

/// Read and parse `manifest.yaml` from a single module directory.
pub fn load_manifest(dir: &Path) -> Result<ModuleManifest, ManifestError> {
    let path = dir.join(MANIFEST_FILE);
    let text = fs::read_to_string(&path).map_err(|e| ManifestError::Io {
        path: path.clone(),
        message: e.to_string(),
    })?;
    ModuleManifest::from_yaml(&text, dir)
}

fn module_label(dir: &Path, error: &ManifestError) -> String {
    if let ManifestError::Validation { id, .. } = error {
        if !id.is_empty() {
            return id.clone();
        }
    }
    // Best effort: pull the id out of a manifest that failed typed parsing.
    fs::read_to_string(dir.join(MANIFEST_FILE))
        .ok()
        .and_then(|text| serde_yaml::from_str::<serde_yaml::Value>(&text).ok())
        .and_then(|value| value.get("id").and_then(|id| id.as_str()).map(str::to_string))
        .unwrap_or_else(|| {
            dir.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
}

/// Check a manifest in isolation and against the ids already `seen`.
///
/// Dependency satisfiability is not checked here; that happens at load time.
pub fn validate(
    manifest: &ModuleManifest,
    seen: &BTreeMap<ModuleId, PathBuf>,
) -> Result<(), ManifestError> {
    let id = manifest.id.as_str();
    let invalid = |reason: String| ManifestError::validation(id, reason);

    if id.is_empty() {
        return Err(invalid("`id` must not be empty".to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid(format!(
            "`id` may only contain ASCII letters, digits, `_` and `-`, got `{}`",
            id
        )));
    }
    if let Some(other) = seen.get(&manifest.id) {
        if other != &manifest.path {
            return Err(invalid(format!(
                "duplicate module id, already declared in {}",
                other.display()
            )));
        }
    }
    if manifest.name.trim().is_empty() {
        return Err(invalid("`name` must not be empty".to_string()));
    }
    if let Err(e) = manifest.parsed_version() {
        return Err(invalid(format!(
            "`version` `{}` is not a semantic version: {}",
            manifest.version, e
        )));
    }
    if manifest.entry_point.as_str().trim().is_empty() {
        return Err(invalid("`entry_point` must not be empty".to_string()));
    }

    for dep in &manifest.dependencies {
        if dep.id() == &manifest.id {
            return Err(invalid("module cannot depend on itself".to_string()));
        }
        if let Err(e) = dep.requirement() {
            return Err(invalid(format!(
                "dependency `{}` has invalid version range `{}`: {}",
                dep.id(),
                dep.version_range().unwrap_or_default(),
                e
            )));
        }
    }

    manifest.resolved_config().map_err(invalid)?;

    Ok(())
}
