//! Module system: manifests, the registry, dependency-aware loading and
//! capability routing.

pub mod executor;
pub mod factory;
pub mod lifecycle;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod router;
pub mod schema;

pub use executor::{ExecutionError, Executor, ModuleInstance, ModuleLifecycle};
pub use factory::{FactoryCatalog, ModuleContext, ModuleFactory};
pub use lifecycle::{LoadedModule, ModuleLease, ModuleSlot, ModuleState};
pub use loader::{ModuleLoader, ModuleStatus};
pub use manifest::{
    Dependency, DiscoveryError, DiscoveryReport, ModuleManifest, ModuleType, discover,
    load_manifest, validate,
};
pub use registry::{
    DiscoveryFailure, DiscoverySummary, ModuleFilter, ModuleRegistry, ModuleSummary,
    RegisterOutcome,
};
pub use router::CapabilityRouter;
pub use schema::{ConfigSchema, FieldKind, FieldSpec};
