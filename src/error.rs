//! Error types for the module system and the execution queue.
//!
//! Every variant maps to a stable machine-readable code via `code()`. The
//! REST layer and task failure records expose these codes verbatim so callers
//! can distinguish failure kinds without parsing messages.

use crate::task::TaskStatus;
use crate::types::{ModuleId, TaskId};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while discovering or validating manifests.
#[derive(Debug, Clone, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("Failed to read manifest {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The manifest is not valid YAML or is missing required fields.
    #[error("Malformed manifest {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The manifest parsed but violates a validation rule.
    #[error("Invalid manifest `{id}`: {reason}")]
    Validation { id: String, reason: String },
}

impl ManifestError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } | Self::Parse { .. } => "MANIFEST_PARSE_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
        }
    }

    pub(crate) fn validation(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the module loader and the capability router.
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    /// No manifest with this id is registered.
    #[error("Module not found: {0}")]
    NotFound(ModuleId),

    /// The dependency graph reachable from the requested module contains a cycle.
    #[error("Dependency cycle detected: {}", format_cycle(.0))]
    DependencyCycle(Vec<ModuleId>),

    /// A dependency's version does not satisfy the declared range.
    #[error("Module `{module}` requires `{dependency}` {required}, found {found}")]
    VersionMismatch {
        module: ModuleId,
        dependency: ModuleId,
        required: String,
        found: String,
    },

    /// The manifest names an entry point no factory is registered for.
    #[error("Module `{module}` has unknown entry point `{entry}`")]
    UnknownEntry { module: ModuleId, entry: String },

    /// The module's configuration failed schema validation at load time.
    #[error("Module `{module}` has invalid configuration: {reason}")]
    InvalidConfig { module: ModuleId, reason: String },

    /// Instantiation or the setup hook failed; the module is now `failed`.
    #[error("Module `{module}` setup failed: {reason}")]
    SetupFailed { module: ModuleId, reason: String },

    /// The module still has in-flight tasks or ready dependents.
    #[error("Module `{module}` is in use: {reason}")]
    InUse { module: ModuleId, reason: String },

    /// The module is not in the `ready` state.
    #[error("Module `{0}` is not loaded")]
    NotLoaded(ModuleId),

    /// A declared dependency left `ready` before its dependent finished loading.
    #[error("Module `{module}` requires `{dependency}`, which is not ready")]
    DependencyNotReady { module: ModuleId, dependency: ModuleId },

    /// No ready executor accepted the task.
    #[error("No capable executor for task type `{0}`")]
    NoCapableExecutor(String),

    /// Re-reading a module's manifest failed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

impl ModuleError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "MODULE_NOT_FOUND",
            Self::DependencyCycle(_) => "DEPENDENCY_CYCLE",
            Self::VersionMismatch { .. } => "DEPENDENCY_VERSION_MISMATCH",
            Self::UnknownEntry { .. } => "UNKNOWN_ENTRY",
            Self::InvalidConfig { .. } => "VALIDATION_ERROR",
            Self::SetupFailed { .. } => "MODULE_SETUP_FAILED",
            Self::InUse { .. } => "IN_USE",
            Self::NotLoaded(_) => "NOT_LOADED",
            Self::DependencyNotReady { .. } => "DEPENDENCY_NOT_READY",
            Self::NoCapableExecutor(_) => "NO_CAPABLE_EXECUTOR",
            Self::Manifest(e) => e.code(),
        }
    }
}

fn format_cycle(path: &[ModuleId]) -> String {
    path.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors raised by the task store and the execution queue.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Task {id} is already {status}")]
    AlreadyTerminal { id: TaskId, status: TaskStatus },

    #[error("Task {id}: illegal transition from {from} via {transition}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        transition: &'static str,
    },

    #[error("Execution queue is stopped")]
    QueueStopped,
}

impl TaskError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "TASK_NOT_FOUND",
            Self::AlreadyTerminal { .. } => "ALREADY_TERMINAL",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::QueueStopped => "QUEUE_STOPPED",
        }
    }
}

pub type ModuleResult<T> = Result<T, ModuleError>;
pub type TaskResult<T> = Result<T, TaskError>;
