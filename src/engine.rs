//! Engine facade: wires the module system to the execution queue and exposes
//! the operations used by the REST layer and the CLI.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{ModuleResult, TaskResult};
use crate::modules::{
    CapabilityRouter, DiscoveryReport, DiscoverySummary, FactoryCatalog, ModuleFilter,
    ModuleLoader, ModuleManifest, ModuleRegistry, ModuleStatus, ModuleSummary, discover,
};
use crate::queue::{ExecutionQueue, QueueSettings, QueueStats};
use crate::task::{NewTask, Task, TaskFilter, TaskStore};
use crate::types::{ModuleId, TaskId};

/// Manifest plus runtime status of one module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDetails {
    pub manifest: ModuleManifest,
    pub status: ModuleStatus,
}

/// Queue statistics plus task and module tallies.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub queue: QueueStats,
    pub tasks: BTreeMap<String, usize>,
    pub modules: BTreeMap<String, usize>,
}

pub struct Engine {
    config: EngineConfig,
    registry: Arc<ModuleRegistry>,
    loader: ModuleLoader,
    store: Arc<TaskStore>,
    queue: ExecutionQueue,
}

impl Engine {
    pub fn new(config: EngineConfig, factories: FactoryCatalog) -> Self {
        let registry = Arc::new(ModuleRegistry::new());
        let loader = ModuleLoader::new(Arc::clone(&registry), factories, config.unload_grace);
        let store = Arc::new(TaskStore::new());
        let queue = ExecutionQueue::new(
            Arc::clone(&store),
            CapabilityRouter::new(Arc::clone(&registry)),
            QueueSettings {
                workers: config.workers,
                default_max_retries: config.default_max_retries,
                default_timeout: config.default_task_timeout,
            },
        );

        Self {
            config,
            registry,
            loader,
            store,
            queue,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Discover modules, load the configured autoload set and start workers.
    /// An autoload failure is logged and leaves that module unloaded or failed.
    pub async fn start(&self) {
        let summary = self.discover_modules().await;
        info!(
            "Discovered {} module(s), {} error(s) under {}",
            summary.inserted.len() + summary.replaced.len() + summary.unchanged.len(),
            summary.errors.len(),
            self.config.modules_dir.display()
        );

        for id in &self.config.autoload {
            match self.loader.load(id).await {
                Ok(module) => info!("Autoloaded {} v{}", id, module.manifest.version),
                Err(e) => warn!("Autoload of {} failed: {}", id, e),
            }
        }

        self.queue.start().await;
    }

    /// Stop the queue, then unload every module.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        self.loader.unload_all().await;
        info!("Engine stopped");
    }

    /// Rescan the modules directory and merge the result into the registry.
    pub async fn discover_modules(&self) -> DiscoverySummary {
        let root = self.config.modules_dir.clone();
        let report = match tokio::task::spawn_blocking(move || discover(&root)).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Module discovery aborted: {}", e);
                DiscoveryReport::default()
            }
        };
        self.registry.apply_discovery(report).await
    }

    /// Register manifests built in code, bypassing discovery.
    pub async fn register_manifest(&self, manifest: ModuleManifest) {
        self.registry.register(manifest).await;
    }

    pub async fn list_modules(&self, filter: &ModuleFilter) -> Vec<ModuleSummary> {
        self.registry.list(filter).await
    }

    pub async fn module(&self, id: &ModuleId) -> ModuleResult<ModuleDetails> {
        let manifest = self.registry.get(id).await?;
        let status = self.loader.status(id).await?;
        Ok(ModuleDetails {
            manifest: (*manifest).clone(),
            status,
        })
    }

    pub async fn load_module(&self, id: &ModuleId) -> ModuleResult<ModuleStatus> {
        self.loader.load(id).await?;
        self.loader.status(id).await
    }

    pub async fn unload_module(&self, id: &ModuleId) -> ModuleResult<ModuleStatus> {
        self.loader.unload(id).await?;
        self.loader.status(id).await
    }

    pub async fn reload_module(&self, id: &ModuleId) -> ModuleResult<ModuleStatus> {
        self.loader.reload(id).await?;
        self.loader.status(id).await
    }

    pub async fn module_status(&self, id: &ModuleId) -> ModuleResult<ModuleStatus> {
        self.loader.status(id).await
    }

    pub async fn submit(&self, request: NewTask) -> TaskResult<Task> {
        self.queue.submit(request).await
    }

    pub async fn task(&self, id: &TaskId) -> TaskResult<Task> {
        self.queue.get(id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        self.store.list(filter).await
    }

    pub async fn cancel_task(&self, id: &TaskId) -> TaskResult<Task> {
        self.queue.cancel(id).await
    }

    /// Wait up to `limit` for the task to settle.
    pub async fn wait_task(&self, id: &TaskId, limit: Duration) -> TaskResult<Task> {
        self.queue.wait(id, limit).await
    }

    pub async fn stats(&self) -> EngineStats {
        let tasks = self
            .store
            .counts()
            .await
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect();

        let mut modules = BTreeMap::new();
        for summary in self.registry.list(&ModuleFilter::default()).await {
            *modules.entry(summary.state.to_string()).or_insert(0) += 1;
        }

        EngineStats {
            queue: self.queue.stats().await,
            tasks,
            modules,
        }
    }
}
