//! Factory catalog: maps a manifest's `entry_point` to the code that builds
//! its implementation.
//!
//! Loading a module looks up the factory registered at startup and hands it
//! the manifest plus its validated configuration.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::modules::executor::ModuleInstance;
use crate::modules::manifest::ModuleManifest;
use crate::types::EntryPoint;

/// Everything a factory gets to build an instance.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub manifest: Arc<ModuleManifest>,
    /// Manifest `config` with schema defaults applied.
    pub config: Map<String, Value>,
}

pub trait ModuleFactory: Send + Sync {
    fn create(&self, ctx: &ModuleContext) -> anyhow::Result<ModuleInstance>;
}

impl<F> ModuleFactory for F
where
    F: Fn(&ModuleContext) -> anyhow::Result<ModuleInstance> + Send + Sync,
{
    fn create(&self, ctx: &ModuleContext) -> anyhow::Result<ModuleInstance> {
        self(ctx)
    }
}

#[derive(Clone, Default)]
pub struct FactoryCatalog {
    factories: HashMap<EntryPoint, Arc<dyn ModuleFactory>>,
}

impl FactoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the built-in implementations.
    pub fn with_builtins() -> Self {
        crate::builtin::register(Self::new())
    }

    pub fn register<F: ModuleFactory + 'static>(
        mut self,
        entry: impl Into<EntryPoint>,
        factory: F,
    ) -> Self {
        self.factories.insert(entry.into(), Arc::new(factory));
        self
    }

    pub fn get(&self, entry: &EntryPoint) -> Option<Arc<dyn ModuleFactory>> {
        self.factories.get(entry).cloned()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.factories.contains_key(entry)
    }

    pub fn entries(&self) -> Vec<EntryPoint> {
        let mut entries: Vec<EntryPoint> = self.factories.keys().cloned().collect();
        entries.sort();
        entries
    }
}
