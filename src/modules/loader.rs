//! Dependency-resolving load, drain-then-unload and reload.
//!
//! Loading resolves the full dependency closure against a catalog snapshot
//! before anything is instantiated, so cycles, unknown ids and version
//! mismatches are reported without side effects. Dependencies are then loaded
//! one module at a time in topological order; each step takes only that
//! module's lifecycle lock, never two at once.

use chrono::Utc;
use semver::Version;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{ModuleError, ModuleResult};
use crate::modules::executor::ModuleInstance;
use crate::modules::factory::{FactoryCatalog, ModuleContext};
use crate::modules::lifecycle::{LoadedModule, ModuleSlot, ModuleState};
use crate::modules::manifest::{self, Dependency, ModuleManifest};
use crate::modules::registry::{ModuleRegistry, RegisterOutcome};
use crate::types::ModuleId;

/// Runtime view of one module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatus {
    pub id: ModuleId,
    pub state: ModuleState,
    /// Version of the live instance, or of the catalog manifest when unloaded.
    pub version: String,
    pub in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<chrono::DateTime<Utc>>,
}

pub struct ModuleLoader {
    registry: Arc<ModuleRegistry>,
    factories: FactoryCatalog,
    unload_grace: Duration,
}

impl ModuleLoader {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        factories: FactoryCatalog,
        unload_grace: Duration,
    ) -> Self {
        Self {
            registry,
            factories,
            unload_grace,
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Load `id` and its dependency closure. Loading a ready module returns
    /// the live instance unchanged.
    ///
    /// If any step fails, dependencies freshly loaded by this call are
    /// unloaded again in reverse order.
    pub async fn load(&self, id: &ModuleId) -> ModuleResult<Arc<LoadedModule>> {
        let slot = self.registry.slot(id).await?;
        if let Some(module) = ready_module(&slot).await {
            return Ok(module);
        }

        let order = self.resolve(id).await?;
        debug!(
            "Load order for {}: {}",
            id,
            order
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut fresh: Vec<ModuleId> = Vec::new();
        for step in &order {
            let outcome = match self.registry.slot(step).await {
                Ok(step_slot) => self.load_one(&step_slot).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok((module, _)) if step == id => return Ok(module),
                Ok((_, true)) => fresh.push(step.clone()),
                Ok((_, false)) => {}
                Err(e) => {
                    self.rollback(&fresh).await;
                    return Err(e);
                }
            }
        }

        // The target is always last in the resolved order.
        Err(ModuleError::NotFound(id.clone()))
    }

    async fn rollback(&self, fresh: &[ModuleId]) {
        for id in fresh.iter().rev() {
            match self.unload(id).await {
                Ok(()) => info!("Rolled back dependency {}", id),
                Err(e) => warn!("Could not roll back dependency {}: {}", id, e),
            }
        }
    }

    /// Topological order of the dependency closure of `root`, dependencies
    /// first and `root` last.
    async fn resolve(&self, root: &ModuleId) -> ModuleResult<Vec<ModuleId>> {
        let manifests = self.registry.manifests().await;

        let mut live_versions: BTreeMap<ModuleId, Version> = BTreeMap::new();
        for slot in self.registry.slots().await {
            if let Some(module) = ready_module(&slot).await {
                if let Ok(version) = module.manifest.parsed_version() {
                    live_versions.insert(slot.id().clone(), version);
                }
            }
        }

        let mut resolver = Resolver {
            manifests: &manifests,
            live_versions: &live_versions,
            stack: Vec::new(),
            visited: HashSet::new(),
            order: Vec::new(),
        };
        resolver.visit(root)?;
        Ok(resolver.order)
    }

    /// Bring a single module to `ready`. Returns the instance and whether this
    /// call created it.
    async fn load_one(&self, slot: &Arc<ModuleSlot>) -> ModuleResult<(Arc<LoadedModule>, bool)> {
        let _lifecycle = slot.lock_lifecycle().await;
        if let Some(module) = ready_module(slot).await {
            return Ok((module, false));
        }

        let manifest = self.registry.get(slot.id()).await?;

        // Enter `loading` before checking dependencies so a concurrent unload
        // of one of them sees this module as a dependent.
        let previous = {
            let mut inner = slot.write().await;
            let previous = (inner.state, inner.failure.take());
            inner.state = ModuleState::Loading;
            previous
        };

        if let Err(e) = self.check_dependencies(&manifest).await {
            let mut inner = slot.write().await;
            inner.state = previous.0;
            inner.failure = previous.1;
            return Err(e);
        }

        info!("Loading module {} v{}", manifest.id, manifest.version);
        match self.instantiate(&manifest).await {
            Ok(instance) => {
                let module = Arc::new(LoadedModule {
                    manifest: Arc::clone(&manifest),
                    instance,
                    loaded_at: Utc::now(),
                });
                let mut inner = slot.write().await;
                inner.state = ModuleState::Ready;
                inner.loaded = Some(Arc::clone(&module));
                inner.failure = None;
                info!("Module {} is ready", manifest.id);
                Ok((module, true))
            }
            Err(e) => {
                error!("Failed to load module {}: {}", manifest.id, e);
                let mut inner = slot.write().await;
                inner.state = ModuleState::Failed;
                inner.loaded = None;
                inner.failure = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Every declared dependency must be ready at a satisfying version.
    async fn check_dependencies(&self, manifest: &ModuleManifest) -> ModuleResult<()> {
        for dep in &manifest.dependencies {
            let dep_slot = self.registry.slot(dep.id()).await?;
            let Some(module) = ready_module(&dep_slot).await else {
                return Err(ModuleError::DependencyNotReady {
                    module: manifest.id.clone(),
                    dependency: dep.id().clone(),
                });
            };
            check_version(&manifest.id, dep, &module.manifest.version)?;
        }
        Ok(())
    }

    async fn instantiate(&self, manifest: &Arc<ModuleManifest>) -> ModuleResult<ModuleInstance> {
        let config = manifest
            .resolved_config()
            .map_err(|reason| ModuleError::InvalidConfig {
                module: manifest.id.clone(),
                reason,
            })?;

        let factory =
            self.factories
                .get(&manifest.entry_point)
                .ok_or_else(|| ModuleError::UnknownEntry {
                    module: manifest.id.clone(),
                    entry: manifest.entry_point.to_string(),
                })?;

        let ctx = ModuleContext {
            manifest: Arc::clone(manifest),
            config,
        };

        // Run factory and setup on their own task so a panic surfaces as a
        // join error instead of unwinding through the loader.
        let setup = tokio::spawn(async move {
            let instance = factory.create(&ctx)?;
            instance.setup().await?;
            Ok::<_, anyhow::Error>(instance)
        });

        let setup_failed = |reason: String| ModuleError::SetupFailed {
            module: manifest.id.clone(),
            reason,
        };
        match setup.await {
            Ok(Ok(instance)) => Ok(instance),
            Ok(Err(e)) => Err(setup_failed(format!("{:#}", e))),
            Err(join) => Err(setup_failed(format!("setup panicked: {}", join))),
        }
    }

    /// Drain and tear down a ready module.
    ///
    /// Fails with `IN_USE` while another ready module depends on it or when
    /// in-flight tasks do not finish within the grace period; in the latter
    /// case the module goes back to `ready`.
    pub async fn unload(&self, id: &ModuleId) -> ModuleResult<()> {
        let slot = self.registry.slot(id).await?;
        let _lifecycle = slot.lock_lifecycle().await;

        if slot.state().await != ModuleState::Ready {
            return Err(ModuleError::NotLoaded(id.clone()));
        }

        // Flip to draining first: from here on the router hands out no new
        // leases and dependency checks of loading modules fail.
        slot.write().await.state = ModuleState::Draining;

        if let Some(dependent) = self.live_dependent(id).await {
            slot.write().await.state = ModuleState::Ready;
            return Err(ModuleError::InUse {
                module: id.clone(),
                reason: format!("required by module `{}`", dependent),
            });
        }

        info!(
            "Draining module {} ({} task(s) in flight)",
            id,
            slot.in_flight()
        );
        let deadline = tokio::time::Instant::now() + self.unload_grace;
        if !slot.wait_drained(deadline).await {
            slot.write().await.state = ModuleState::Ready;
            let in_flight = slot.in_flight();
            warn!(
                "Module {} still has {} task(s) in flight after {:?}",
                id, in_flight, self.unload_grace
            );
            return Err(ModuleError::InUse {
                module: id.clone(),
                reason: format!(
                    "{} task(s) still in flight after {:?}",
                    in_flight, self.unload_grace
                ),
            });
        }

        if let Some(module) = slot.loaded().await {
            let teardown = tokio::spawn(async move { module.instance.teardown().await });
            if let Err(e) = teardown.await {
                error!("Teardown of module {} panicked: {}", id, e);
            }
        }

        let mut inner = slot.write().await;
        inner.state = ModuleState::Unloaded;
        inner.loaded = None;
        inner.failure = None;
        info!("Module {} unloaded", id);
        Ok(())
    }

    /// A module other than `id` that is ready or loading and declares `id` as
    /// a dependency.
    async fn live_dependent(&self, id: &ModuleId) -> Option<ModuleId> {
        let manifests = self.registry.manifests().await;
        for slot in self.registry.slots().await {
            if slot.id() == id {
                continue;
            }
            let manifest = match slot.state().await {
                ModuleState::Ready | ModuleState::Draining => match slot.loaded().await {
                    Some(module) => Arc::clone(&module.manifest),
                    None => continue,
                },
                ModuleState::Loading => match manifests.get(slot.id()) {
                    Some(manifest) => Arc::clone(manifest),
                    None => continue,
                },
                ModuleState::Unloaded | ModuleState::Failed => continue,
            };
            if manifest.dependencies.iter().any(|d| d.id() == id) {
                return Some(slot.id().clone());
            }
        }
        None
    }

    /// Re-read the module's manifest from disk, then unload (if loaded) and
    /// load again. The new instance is built from the refreshed manifest.
    pub async fn reload(&self, id: &ModuleId) -> ModuleResult<Arc<LoadedModule>> {
        let current = self.registry.get(id).await?;

        if !current.path.as_os_str().is_empty() {
            let fresh = manifest::load_manifest(&current.path)?;
            if &fresh.id != id {
                return Err(ModuleError::Manifest(
                    crate::error::ManifestError::validation(
                        fresh.id.as_str(),
                        format!("manifest in {} now declares a different id", current.path.display()),
                    ),
                ));
            }
            manifest::validate(&fresh, &self.registry.seen_paths().await)?;
            if self.registry.register(fresh).await == RegisterOutcome::Replaced {
                info!("Manifest for {} changed on disk", id);
            }
        }

        match self.unload(id).await {
            Ok(()) | Err(ModuleError::NotLoaded(_)) => {}
            Err(e) => return Err(e),
        }
        self.load(id).await
    }

    pub async fn status(&self, id: &ModuleId) -> ModuleResult<ModuleStatus> {
        let manifest = self.registry.get(id).await?;
        let slot = self.registry.slot(id).await?;
        let loaded = slot.loaded().await;

        Ok(ModuleStatus {
            id: id.clone(),
            state: slot.state().await,
            version: loaded
                .as_ref()
                .map(|m| m.manifest.version.clone())
                .unwrap_or_else(|| manifest.version.clone()),
            in_flight: slot.in_flight(),
            failure: slot.failure().await,
            loaded_at: loaded.map(|m| m.loaded_at),
        })
    }

    /// Unload every ready module, dependents before their dependencies.
    pub async fn unload_all(&self) {
        loop {
            let mut progressed = false;
            let mut remaining = 0;
            for slot in self.registry.slots().await {
                if slot.state().await != ModuleState::Ready {
                    continue;
                }
                remaining += 1;
                match self.unload(slot.id()).await {
                    Ok(()) => progressed = true,
                    Err(e) => debug!("Deferring unload of {}: {}", slot.id(), e),
                }
            }
            if remaining == 0 || !progressed {
                if remaining > 0 {
                    warn!("{} module(s) could not be unloaded", remaining);
                }
                return;
            }
        }
    }
}

async fn ready_module(slot: &ModuleSlot) -> Option<Arc<LoadedModule>> {
    if slot.state().await == ModuleState::Ready {
        slot.loaded().await
    } else {
        None
    }
}

fn check_version(module: &ModuleId, dep: &Dependency, found: &str) -> ModuleResult<()> {
    let mismatch = || ModuleError::VersionMismatch {
        module: module.clone(),
        dependency: dep.id().clone(),
        required: dep.version_range().unwrap_or("*").to_string(),
        found: found.to_string(),
    };
    let required = dep.requirement().map_err(|_| mismatch())?;
    let version = Version::parse(found).map_err(|_| mismatch())?;
    if required.matches(&version) {
        Ok(())
    } else {
        Err(mismatch())
    }
}

/// Depth-first walk over the catalog snapshot.
struct Resolver<'a> {
    manifests: &'a BTreeMap<ModuleId, Arc<ModuleManifest>>,
    /// Versions of modules already ready; these win over catalog versions
    /// because a ready module is not rebuilt by a load.
    live_versions: &'a BTreeMap<ModuleId, Version>,
    stack: Vec<ModuleId>,
    visited: HashSet<ModuleId>,
    order: Vec<ModuleId>,
}

impl Resolver<'_> {
    fn visit(&mut self, id: &ModuleId) -> ModuleResult<()> {
        if self.visited.contains(id) {
            return Ok(());
        }
        if let Some(pos) = self.stack.iter().position(|s| s == id) {
            let mut cycle = self.stack[pos..].to_vec();
            cycle.push(id.clone());
            return Err(ModuleError::DependencyCycle(cycle));
        }

        let manifest = self
            .manifests
            .get(id)
            .ok_or_else(|| ModuleError::NotFound(id.clone()))?;

        self.stack.push(id.clone());
        for dep in &manifest.dependencies {
            self.visit(dep.id())?;

            let found = match self.live_versions.get(dep.id()) {
                Some(version) => version.to_string(),
                None => self
                    .manifests
                    .get(dep.id())
                    .map(|m| m.version.clone())
                    .unwrap_or_default(),
            };
            check_version(id, dep, &found)?;
        }
        self.stack.pop();

        self.visited.insert(id.clone());
        self.order.push(id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        Counters, component_manifest, manifest, ranged, test_factories, write_manifest,
    };
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    async fn loader_with(manifests: Vec<ModuleManifest>) -> ModuleLoader {
        loader_with_catalog(manifests, test_factories()).await
    }

    async fn loader_with_catalog(
        manifests: Vec<ModuleManifest>,
        factories: FactoryCatalog,
    ) -> ModuleLoader {
        let registry = Arc::new(ModuleRegistry::new());
        for m in manifests {
            registry.register(m).await;
        }
        ModuleLoader::new(registry, factories, Duration::from_millis(200))
    }

    fn id(s: &str) -> ModuleId {
        ModuleId::new(s)
    }

    async fn state(loader: &ModuleLoader, module: &str) -> ModuleState {
        loader.status(&id(module)).await.unwrap().state
    }

    #[tokio::test]
    async fn test_load_pulls_in_dependencies() {
        let loader = loader_with(vec![
            manifest("app", "1.0.0", &["db"]),
            manifest("db", "1.0.0", &["log"]),
            manifest("log", "1.0.0", &[]),
        ])
        .await;

        loader.load(&id("app")).await.unwrap();

        for m in ["app", "db", "log"] {
            assert_eq!(state(&loader, m).await, ModuleState::Ready);
        }
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let counters = Counters::default();
        let mut m = manifest("count", "1.0.0", &[]);
        m.entry_point = "test:counting".into();
        let loader = loader_with_catalog(vec![m], counters.register(test_factories())).await;

        let first = loader.load(&id("count")).await.unwrap();
        let second = loader.load(&id("count")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counters.setups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cycle_rejected_without_side_effects() {
        let loader = loader_with(vec![
            manifest("a", "1.0.0", &["b"]),
            manifest("b", "1.0.0", &["c"]),
            manifest("c", "1.0.0", &["a"]),
        ])
        .await;

        let err = loader.load(&id("a")).await.unwrap_err();
        assert_eq!(err.code(), "DEPENDENCY_CYCLE");
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> c -> a");
        for m in ["a", "b", "c"] {
            assert_eq!(state(&loader, m).await, ModuleState::Unloaded);
        }
    }

    #[tokio::test]
    async fn test_missing_dependency() {
        let loader = loader_with(vec![manifest("app", "1.0.0", &["ghost"])]).await;
        let err = loader.load(&id("app")).await.unwrap_err();
        assert!(matches!(err, ModuleError::NotFound(ref m) if m.as_str() == "ghost"));
        assert_eq!(state(&loader, "app").await, ModuleState::Unloaded);
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let mut app = manifest("app", "1.0.0", &[]);
        app.dependencies = vec![ranged("db", ">=2.0.0")];
        let loader = loader_with(vec![app, manifest("db", "1.4.0", &[])]).await;

        let err = loader.load(&id("app")).await.unwrap_err();
        assert_eq!(err.code(), "DEPENDENCY_VERSION_MISMATCH");
        assert_eq!(state(&loader, "db").await, ModuleState::Unloaded);
    }

    #[tokio::test]
    async fn test_failed_setup_rolls_back_fresh_dependencies() {
        let mut app = manifest("app", "1.0.0", &["db", "cache"]);
        app.entry_point = "test:setup_fail".into();
        let loader = loader_with(vec![
            app,
            manifest("db", "1.0.0", &[]),
            manifest("cache", "1.0.0", &[]),
        ])
        .await;

        // `cache` was already loaded before this call and must stay loaded.
        loader.load(&id("cache")).await.unwrap();

        let err = loader.load(&id("app")).await.unwrap_err();
        assert_eq!(err.code(), "MODULE_SETUP_FAILED");

        let status = loader.status(&id("app")).await.unwrap();
        assert_eq!(status.state, ModuleState::Failed);
        assert!(status.failure.unwrap().contains("setup refused"));
        assert_eq!(state(&loader, "db").await, ModuleState::Unloaded);
        assert_eq!(state(&loader, "cache").await, ModuleState::Ready);
    }

    #[tokio::test]
    async fn test_panicking_setup_marks_failed() {
        let mut m = manifest("boom", "1.0.0", &[]);
        m.entry_point = "test:setup_panic".into();
        let loader = loader_with(vec![m]).await;

        let err = loader.load(&id("boom")).await.unwrap_err();
        assert_eq!(err.code(), "MODULE_SETUP_FAILED");
        assert_eq!(state(&loader, "boom").await, ModuleState::Failed);
    }

    #[tokio::test]
    async fn test_unknown_entry_point() {
        let mut m = manifest("mystery", "1.0.0", &[]);
        m.entry_point = "test:nope".into();
        let loader = loader_with(vec![m]).await;

        let err = loader.load(&id("mystery")).await.unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_ENTRY");
        assert_eq!(state(&loader, "mystery").await, ModuleState::Failed);
    }

    #[tokio::test]
    async fn test_failed_module_can_be_reloaded() {
        let mut m = manifest("later", "1.0.0", &[]);
        m.entry_point = "test:later".into();
        let loader = loader_with(vec![m.clone()]).await;
        assert!(loader.load(&id("later")).await.is_err());

        let loader = ModuleLoader::new(
            Arc::clone(loader.registry()),
            test_factories().register(
                "test:later",
                |_ctx: &ModuleContext| -> anyhow::Result<ModuleInstance> {
                    Ok(crate::testing::echo_instance())
                },
            ),
            Duration::from_millis(200),
        );
        loader.load(&id("later")).await.unwrap();
        let status = loader.status(&id("later")).await.unwrap();
        assert_eq!(status.state, ModuleState::Ready);
        assert!(status.failure.is_none());
    }

    #[tokio::test]
    async fn test_unload_refused_while_dependent_ready() {
        let loader = loader_with(vec![
            manifest("app", "1.0.0", &["db"]),
            manifest("db", "1.0.0", &[]),
        ])
        .await;
        loader.load(&id("app")).await.unwrap();

        let err = loader.unload(&id("db")).await.unwrap_err();
        assert_eq!(err.code(), "IN_USE");
        assert_eq!(state(&loader, "db").await, ModuleState::Ready);

        loader.unload(&id("app")).await.unwrap();
        loader.unload(&id("db")).await.unwrap();
        assert_eq!(state(&loader, "db").await, ModuleState::Unloaded);
    }

    #[tokio::test]
    async fn test_dependency_not_ready_names_both_modules() {
        let loader = loader_with(vec![
            manifest("app", "1.0.0", &["db"]),
            manifest("db", "1.0.0", &[]),
        ])
        .await;
        let app = loader.registry().get(&id("app")).await.unwrap();

        let err = loader.check_dependencies(&app).await.unwrap_err();
        assert_eq!(err.code(), "DEPENDENCY_NOT_READY");
        assert_eq!(
            err.to_string(),
            "Module `app` requires `db`, which is not ready"
        );

        loader.load(&id("db")).await.unwrap();
        assert!(loader.check_dependencies(&app).await.is_ok());
    }

    #[tokio::test]
    async fn test_unload_not_loaded() {
        let loader = loader_with(vec![manifest("idle", "1.0.0", &[])]).await;
        let err = loader.unload(&id("idle")).await.unwrap_err();
        assert_eq!(err.code(), "NOT_LOADED");
    }

    #[tokio::test]
    async fn test_unload_waits_for_in_flight_lease() {
        let counters = Counters::default();
        let mut m = manifest("count", "1.0.0", &[]);
        m.entry_point = "test:counting".into();
        let loader = Arc::new(
            loader_with_catalog(vec![m], counters.register(test_factories())).await,
        );
        loader.load(&id("count")).await.unwrap();

        let slot = loader.registry().slot(&id("count")).await.unwrap();
        let lease = slot.try_lease_if(|_| true).await.unwrap();

        let unloader = {
            let loader = Arc::clone(&loader);
            tokio::spawn(async move { loader.unload(&id("count")).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(slot.state().await, ModuleState::Draining);
        assert!(slot.try_lease_if(|_| true).await.is_none());
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 0);

        drop(lease);
        unloader.await.unwrap().unwrap();
        assert_eq!(slot.state().await, ModuleState::Unloaded);
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unload_grace_expiry_restores_ready() {
        let loader = loader_with(vec![manifest("busy", "1.0.0", &[])]).await;
        loader.load(&id("busy")).await.unwrap();
        let slot = loader.registry().slot(&id("busy")).await.unwrap();
        let _lease = slot.try_lease_if(|_| true).await.unwrap();

        let err = loader.unload(&id("busy")).await.unwrap_err();
        assert_eq!(err.code(), "IN_USE");
        assert_eq!(slot.state().await, ModuleState::Ready);
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_manifest() {
        let root = TempDir::new().unwrap();
        let dir = write_manifest(
            root.path(),
            "executors",
            "swap",
            "id: swap\nname: Swap\nversion: 1.0.0\ntype: executor\nentry_point: test:echo\n",
        );
        let registry = Arc::new(ModuleRegistry::new());
        registry
            .register(manifest::load_manifest(&dir).unwrap())
            .await;
        let loader = ModuleLoader::new(registry, test_factories(), Duration::from_millis(200));

        let before = loader.load(&id("swap")).await.unwrap();
        assert_eq!(before.manifest.version, "1.0.0");

        write_manifest(
            root.path(),
            "executors",
            "swap",
            "id: swap\nname: Swap\nversion: 1.1.0\ntype: executor\nentry_point: test:echo\n",
        );
        let after = loader.reload(&id("swap")).await.unwrap();

        assert_eq!(after.manifest.version, "1.1.0");
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(loader.status(&id("swap")).await.unwrap().version, "1.1.0");
    }

    #[tokio::test]
    async fn test_unload_all_respects_dependencies() {
        let loader = loader_with(vec![
            manifest("app", "1.0.0", &["store"]),
            component_manifest("store", &[]),
        ])
        .await;
        loader.load(&id("app")).await.unwrap();

        loader.unload_all().await;

        assert_eq!(state(&loader, "app").await, ModuleState::Unloaded);
        assert_eq!(state(&loader, "store").await, ModuleState::Unloaded);
    }
}
