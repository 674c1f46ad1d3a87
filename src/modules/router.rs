//! Capability routing: pick the ready executor for a task.
//!
//! Candidates are ready executor modules whose capability tags accept the
//! task type. They are asked in descending manifest `priority`, ties broken by
//! ascending module id, and the first whose `can_handle` returns true wins.
//! The lease is taken in the same step, so a module that starts draining
//! right after selection still counts the task as in flight.

use std::sync::Arc;
use tracing::debug;

use crate::error::{ModuleError, ModuleResult};
use crate::modules::lifecycle::ModuleLease;
use crate::modules::manifest::ModuleType;
use crate::modules::registry::ModuleRegistry;
use crate::task::Task;

#[derive(Debug, Clone)]
pub struct CapabilityRouter {
    registry: Arc<ModuleRegistry>,
}

impl CapabilityRouter {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }

    pub async fn select(&self, task: &Task) -> ModuleResult<ModuleLease> {
        let mut candidates = Vec::new();
        for slot in self.registry.slots().await {
            let Some(module) = slot.loaded().await else {
                continue;
            };
            let manifest = &module.manifest;
            if manifest.module_type == ModuleType::Executor && manifest.accepts(&task.task_type) {
                candidates.push((manifest.priority, slot));
            }
        }

        // Slots come ordered by id; a stable sort keeps that as the tie-break.
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, slot) in candidates {
            let lease = slot
                .try_lease_if(|module| {
                    module.manifest.accepts(&task.task_type)
                        && module
                            .instance
                            .as_executor()
                            .is_some_and(|executor| executor.can_handle(task))
                })
                .await;
            if let Some(lease) = lease {
                debug!("Routed task {} ({}) to {}", task.id, task.task_type, lease.id());
                return Ok(lease);
            }
        }

        Err(ModuleError::NoCapableExecutor(task.task_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::loader::ModuleLoader;
    use crate::modules::manifest::ModuleManifest;
    use crate::task::{NewTask, TaskStore};
    use crate::testing::{manifest, test_factories};
    use crate::types::ModuleId;
    use serde_json::json;
    use std::time::Duration;

    fn executor(id: &str, priority: i32, caps: &[&str], entry: &str) -> ModuleManifest {
        let mut m = manifest(id, "1.0.0", &[]);
        m.priority = priority;
        m.capabilities = caps.iter().map(|c| c.to_string()).collect();
        m.entry_point = entry.into();
        m
    }

    async fn setup(manifests: Vec<ModuleManifest>) -> (ModuleLoader, CapabilityRouter) {
        let registry = Arc::new(ModuleRegistry::new());
        for m in manifests {
            registry.register(m).await;
        }
        let loader = ModuleLoader::new(
            Arc::clone(&registry),
            test_factories(),
            Duration::from_millis(100),
        );
        for slot in registry.slots().await {
            loader.load(slot.id()).await.unwrap();
        }
        (loader, CapabilityRouter::new(registry))
    }

    async fn task(task_type: &str, params: serde_json::Value) -> Task {
        let mut request = NewTask::new(task_type);
        if let Some(map) = params.as_object() {
            request.parameters = map.clone();
        }
        TaskStore::new().create(request, 0, None).await
    }

    #[tokio::test]
    async fn test_highest_priority_wins() {
        let (_loader, router) = setup(vec![
            executor("low", 1, &["generation"], "test:echo"),
            executor("high", 10, &["generation"], "test:echo"),
        ])
        .await;

        let lease = router.select(&task("generation", json!({})).await).await.unwrap();
        assert_eq!(lease.id().as_str(), "high");
    }

    #[tokio::test]
    async fn test_tie_broken_by_id() {
        let (_loader, router) = setup(vec![
            executor("bravo", 5, &["*"], "test:echo"),
            executor("alpha", 5, &["*"], "test:echo"),
        ])
        .await;

        let lease = router.select(&task("anything", json!({})).await).await.unwrap();
        assert_eq!(lease.id().as_str(), "alpha");
    }

    #[tokio::test]
    async fn test_can_handle_refusal_falls_through() {
        let (_loader, router) = setup(vec![
            executor("picky", 10, &["generation"], "test:picky"),
            executor("fallback", 1, &["generation"], "test:echo"),
        ])
        .await;

        let lease = router.select(&task("generation", json!({})).await).await.unwrap();
        assert_eq!(lease.id().as_str(), "fallback");
        drop(lease);

        let lease = router
            .select(&task("generation", json!({"picky": true})).await)
            .await
            .unwrap();
        assert_eq!(lease.id().as_str(), "picky");
    }

    #[tokio::test]
    async fn test_no_capable_executor() {
        let (_loader, router) =
            setup(vec![executor("gen", 1, &["generation"], "test:echo")]).await;

        let err = router.select(&task("analysis", json!({})).await).await.unwrap_err();
        assert_eq!(err.code(), "NO_CAPABLE_EXECUTOR");
    }

    #[tokio::test]
    async fn test_unloaded_executor_not_selected() {
        let (loader, router) = setup(vec![executor("gen", 1, &["*"], "test:echo")]).await;
        loader.unload(&ModuleId::new("gen")).await.unwrap();

        let err = router.select(&task("generation", json!({})).await).await.unwrap_err();
        assert_eq!(err.code(), "NO_CAPABLE_EXECUTOR");
    }

    #[tokio::test]
    async fn test_selection_takes_lease() {
        let (loader, router) = setup(vec![executor("gen", 1, &["*"], "test:echo")]).await;
        let lease = router.select(&task("generation", json!({})).await).await.unwrap();

        let status = loader.status(&ModuleId::new("gen")).await.unwrap();
        assert_eq!(status.in_flight, 1);
        drop(lease);
        let status = loader.status(&ModuleId::new("gen")).await.unwrap();
        assert_eq!(status.in_flight, 0);
    }
}
