// Core modules
pub mod config;
pub mod error;
pub mod types;

// Module system and execution
pub mod builtin;
pub mod modules;
pub mod queue;
pub mod task;

pub mod api;
pub mod engine;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use config::EngineConfig;
pub use engine::{Engine, EngineStats, ModuleDetails};
pub use error::{ManifestError, ModuleError, ModuleResult, TaskError, TaskResult};
pub use types::{EntryPoint, ModuleId, TaskId, TaskType};

pub use modules::{
    ExecutionError, Executor, FactoryCatalog, ModuleContext, ModuleFilter, ModuleInstance,
    ModuleLifecycle, ModuleManifest, ModuleState, ModuleStatus, ModuleType,
};
pub use queue::{ExecutionQueue, QueueSettings, QueueStats};
pub use task::{FailureKind, NewTask, Priority, Task, TaskFailure, TaskFilter, TaskStatus};
