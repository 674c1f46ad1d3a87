//! Catalog of known manifests and their runtime slots.
//!
//! The registry is the single place manifests are stored. Each id maps to the
//! latest validated manifest and a [`ModuleSlot`] that outlives manifest
//! replacement, so a module loaded from an older manifest keeps its state
//! until it is reloaded.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{ModuleError, ModuleResult};
use crate::modules::lifecycle::{ModuleSlot, ModuleState};
use crate::modules::manifest::{DiscoveryReport, ModuleManifest, ModuleType};
use crate::types::ModuleId;

/// What `register` did with a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterOutcome {
    Inserted,
    Replaced,
    Unchanged,
}

/// A manifest that failed discovery, as exposed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryFailure {
    pub module: String,
    pub path: PathBuf,
    pub code: &'static str,
    pub message: String,
}

/// Result of applying a discovery scan to the registry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoverySummary {
    pub inserted: Vec<ModuleId>,
    pub replaced: Vec<ModuleId>,
    pub unchanged: Vec<ModuleId>,
    pub errors: Vec<DiscoveryFailure>,
}

/// One row of [`ModuleRegistry::list`].
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub id: ModuleId,
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    pub description: String,
    pub priority: i32,
    pub capabilities: Vec<String>,
    pub state: ModuleState,
    /// Version of the live instance when it differs from the catalog manifest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_version: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModuleFilter {
    pub module_type: Option<ModuleType>,
    pub state: Option<ModuleState>,
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    manifest: Arc<ModuleManifest>,
    slot: Arc<ModuleSlot>,
}

#[derive(Debug, Default)]
pub struct ModuleRegistry {
    entries: RwLock<BTreeMap<ModuleId, RegistryEntry>>,
    discovery_errors: RwLock<Vec<DiscoveryFailure>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a manifest. Re-registering identical content is a
    /// no-op.
    pub async fn register(&self, manifest: ModuleManifest) -> RegisterOutcome {
        let mut entries = self.entries.write().await;
        let id = manifest.id.clone();

        match entries.get_mut(&id) {
            Some(entry) if entry.manifest.fingerprint == manifest.fingerprint => {
                debug!("Manifest for {} unchanged", id);
                RegisterOutcome::Unchanged
            }
            Some(entry) => {
                info!(
                    "Replacing manifest for {} (v{} -> v{})",
                    id, entry.manifest.version, manifest.version
                );
                entry.manifest = Arc::new(manifest);
                RegisterOutcome::Replaced
            }
            None => {
                info!("Registered module {} v{}", id, manifest.version);
                let slot = Arc::new(ModuleSlot::new(id.clone()));
                entries.insert(
                    id,
                    RegistryEntry {
                        manifest: Arc::new(manifest),
                        slot,
                    },
                );
                RegisterOutcome::Inserted
            }
        }
    }

    /// Register every manifest of a discovery scan and remember its errors.
    ///
    /// Manifests no longer on disk stay registered.
    pub async fn apply_discovery(&self, report: DiscoveryReport) -> DiscoverySummary {
        let mut summary = DiscoverySummary::default();

        for manifest in report.manifests {
            let id = manifest.id.clone();
            match self.register(manifest).await {
                RegisterOutcome::Inserted => summary.inserted.push(id),
                RegisterOutcome::Replaced => summary.replaced.push(id),
                RegisterOutcome::Unchanged => summary.unchanged.push(id),
            }
        }

        summary.errors = report
            .errors
            .into_iter()
            .map(|e| DiscoveryFailure {
                module: e.module,
                path: e.path,
                code: e.error.code(),
                message: e.error.to_string(),
            })
            .collect();
        *self.discovery_errors.write().await = summary.errors.clone();

        summary
    }

    pub async fn get(&self, id: &ModuleId) -> ModuleResult<Arc<ModuleManifest>> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| Arc::clone(&e.manifest))
            .ok_or_else(|| ModuleError::NotFound(id.clone()))
    }

    pub async fn slot(&self, id: &ModuleId) -> ModuleResult<Arc<ModuleSlot>> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| Arc::clone(&e.slot))
            .ok_or_else(|| ModuleError::NotFound(id.clone()))
    }

    /// Every slot, ordered by id.
    pub async fn slots(&self) -> Vec<Arc<ModuleSlot>> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| Arc::clone(&e.slot))
            .collect()
    }

    /// Snapshot of catalog manifests, ordered by id.
    pub async fn manifests(&self) -> BTreeMap<ModuleId, Arc<ModuleManifest>> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, e)| (id.clone(), Arc::clone(&e.manifest)))
            .collect()
    }

    /// Directory each registered id was read from, for duplicate checks.
    pub async fn seen_paths(&self) -> BTreeMap<ModuleId, PathBuf> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, e)| (id.clone(), e.manifest.path.clone()))
            .collect()
    }

    pub async fn discovery_errors(&self) -> Vec<DiscoveryFailure> {
        self.discovery_errors.read().await.clone()
    }

    pub async fn list(&self, filter: &ModuleFilter) -> Vec<ModuleSummary> {
        let entries: Vec<RegistryEntry> = self.entries.read().await.values().cloned().collect();

        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            let manifest = &entry.manifest;
            if filter
                .module_type
                .is_some_and(|t| t != manifest.module_type)
            {
                continue;
            }
            let state = entry.slot.state().await;
            if filter.state.is_some_and(|s| s != state) {
                continue;
            }
            let loaded_version = entry
                .slot
                .loaded()
                .await
                .map(|m| m.manifest.version.clone())
                .filter(|v| v != &manifest.version);

            summaries.push(ModuleSummary {
                id: manifest.id.clone(),
                name: manifest.name.clone(),
                version: manifest.version.clone(),
                module_type: manifest.module_type,
                description: manifest.description.clone(),
                priority: manifest.priority,
                capabilities: manifest.capabilities.iter().cloned().collect(),
                state,
                loaded_version,
            });
        }
        summaries
    }
}
