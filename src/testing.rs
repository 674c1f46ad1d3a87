//! Fixtures shared by unit tests: manifests, on-disk module trees and a
//! catalog of small executors with predictable behavior.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::modules::executor::{ExecutionError, Executor, ModuleInstance, ModuleLifecycle};
use crate::modules::factory::{FactoryCatalog, ModuleContext};
use crate::modules::lifecycle::LoadedModule;
use crate::modules::manifest::{Dependency, ModuleManifest, ModuleType};
use crate::task::Task;
use crate::types::ModuleId;

/// Write `<root>/<type_dir>/<module_dir>/manifest.yaml` and return the module
/// directory.
pub fn write_manifest(root: &Path, type_dir: &str, module_dir: &str, text: &str) -> PathBuf {
    let dir = root.join(type_dir).join(module_dir);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("manifest.yaml"), text).unwrap();
    dir
}

/// In-memory executor manifest accepting every task type, served by
/// `test:echo`.
pub fn manifest(id: &str, version: &str, deps: &[&str]) -> ModuleManifest {
    let yaml = format!(
        "id: {id}\nname: {id}\nversion: {version}\ntype: executor\nentry_point: test:echo\ncapabilities: ['*']\n"
    );
    let mut manifest = ModuleManifest::from_yaml(&yaml, Path::new("")).unwrap();
    manifest.path = PathBuf::new();
    manifest.dependencies = deps
        .iter()
        .map(|d| Dependency::Any(ModuleId::new(*d)))
        .collect();
    manifest.fingerprint = format!("{}@{}:{}", id, version, deps.join(","));
    manifest
}

pub fn ranged(id: &str, range: &str) -> Dependency {
    Dependency::Ranged {
        id: ModuleId::new(id),
        version: Some(range.to_string()),
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    /// Returns the parameters; honors `sleep_ms` cooperatively.
    Echo,
    /// Always fails.
    Fail,
    /// Fails while `retry_count < fail_times`.
    Flaky,
    /// Waits for cancellation (or `sleep_ms`, default 10s).
    Slow,
    /// Sleeps `sleep_ms` ignoring the token, then succeeds.
    Stubborn,
    Panic,
    /// Only handles tasks carrying a `picky` parameter.
    Picky,
}

struct TestExecutor {
    mode: Mode,
}

fn sleep_ms(task: &Task, default: u64) -> Duration {
    Duration::from_millis(
        task.parameters
            .get("sleep_ms")
            .and_then(Value::as_u64)
            .unwrap_or(default),
    )
}

impl ModuleLifecycle for TestExecutor {}

#[async_trait]
impl Executor for TestExecutor {
    fn can_handle(&self, task: &Task) -> bool {
        match self.mode {
            Mode::Picky => task.parameters.contains_key("picky"),
            _ => true,
        }
    }

    async fn execute(&self, task: Task, cancel: CancellationToken) -> Result<Value, ExecutionError> {
        match self.mode {
            Mode::Echo | Mode::Picky => {
                let pause = sleep_ms(&task, 0);
                if !pause.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
                Ok(json!({"echo": task.parameters, "attempt": task.retry_count + 1}))
            }
            Mode::Fail => Err(ExecutionError::failed("boom")),
            Mode::Flaky => {
                let fail_times = task
                    .parameters
                    .get("fail_times")
                    .and_then(Value::as_u64)
                    .unwrap_or(1);
                if u64::from(task.retry_count) < fail_times {
                    Err(ExecutionError::failed(format!("flaky attempt {}", task.retry_count + 1)))
                } else {
                    Ok(json!({"attempts": task.retry_count + 1}))
                }
            }
            Mode::Slow => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
                    _ = tokio::time::sleep(sleep_ms(&task, 10_000)) => Ok(json!("finished")),
                }
            }
            Mode::Stubborn => {
                tokio::time::sleep(sleep_ms(&task, 100)).await;
                Ok(json!("done"))
            }
            Mode::Panic => panic!("executor exploded"),
        }
    }
}

struct Refusing;

#[async_trait]
impl ModuleLifecycle for Refusing {
    async fn setup(&self) -> anyhow::Result<()> {
        anyhow::bail!("setup refused")
    }
}

struct PanickingSetup;

#[async_trait]
impl ModuleLifecycle for PanickingSetup {
    async fn setup(&self) -> anyhow::Result<()> {
        panic!("setup exploded")
    }
}

struct Inert;

impl ModuleLifecycle for Inert {}

fn executor_factory(
    mode: Mode,
) -> impl Fn(&ModuleContext) -> anyhow::Result<ModuleInstance> + Send + Sync + 'static {
    move |_ctx: &ModuleContext| -> anyhow::Result<ModuleInstance> {
        Ok(ModuleInstance::executor(TestExecutor { mode }))
    }
}

pub fn echo_instance() -> ModuleInstance {
    ModuleInstance::executor(TestExecutor { mode: Mode::Echo })
}

/// A ready-looking instance for slot-level tests that bypass the loader.
pub fn echo_module(manifest: ModuleManifest) -> Arc<LoadedModule> {
    Arc::new(LoadedModule {
        manifest: Arc::new(manifest),
        instance: echo_instance(),
        loaded_at: Utc::now(),
    })
}

/// Catalog with every `test:*` entry point.
pub fn test_factories() -> FactoryCatalog {
    FactoryCatalog::with_builtins()
        .register("test:echo", executor_factory(Mode::Echo))
        .register("test:fail", executor_factory(Mode::Fail))
        .register("test:flaky", executor_factory(Mode::Flaky))
        .register("test:slow", executor_factory(Mode::Slow))
        .register("test:stubborn", executor_factory(Mode::Stubborn))
        .register("test:panic", executor_factory(Mode::Panic))
        .register("test:picky", executor_factory(Mode::Picky))
        .register(
            "test:setup_fail",
            |_ctx: &ModuleContext| -> anyhow::Result<ModuleInstance> {
                Ok(ModuleInstance::component(Refusing))
            },
        )
        .register(
            "test:setup_panic",
            |_ctx: &ModuleContext| -> anyhow::Result<ModuleInstance> {
                Ok(ModuleInstance::component(PanickingSetup))
            },
        )
        .register(
            "test:component",
            |_ctx: &ModuleContext| -> anyhow::Result<ModuleInstance> {
                Ok(ModuleInstance::component(Inert))
            },
        )
}

/// Setup and teardown counts observed by `test:counting` instances.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub setups: Arc<AtomicUsize>,
    pub teardowns: Arc<AtomicUsize>,
}

struct Counting(Counters);

#[async_trait]
impl ModuleLifecycle for Counting {
    async fn setup(&self) -> anyhow::Result<()> {
        self.0.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn teardown(&self) {
        self.0.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Executor for Counting {
    async fn execute(&self, task: Task, _cancel: CancellationToken) -> Result<Value, ExecutionError> {
        Ok(json!({"task": task.id}))
    }
}

impl Counters {
    pub fn register(&self, catalog: FactoryCatalog) -> FactoryCatalog {
        let counters = self.clone();
        catalog.register(
            "test:counting",
            move |_ctx: &ModuleContext| -> anyhow::Result<ModuleInstance> {
                Ok(ModuleInstance::executor(Counting(counters.clone())))
            },
        )
    }
}

/// Integration manifest with a given entry point, for non-executor modules.
pub fn component_manifest(id: &str, deps: &[&str]) -> ModuleManifest {
    let mut m = manifest(id, "1.0.0", deps);
    m.module_type = ModuleType::Integration;
    m.entry_point = "test:component".into();
    m
}

/// Invocation count of the always-failing `test:counted_fail` executor.
#[derive(Debug, Clone, Default)]
pub struct AttemptCounter(pub Arc<AtomicUsize>);

struct CountedFail(Arc<AtomicUsize>);

impl ModuleLifecycle for CountedFail {}

#[async_trait]
impl Executor for CountedFail {
    async fn execute(&self, _task: Task, _cancel: CancellationToken) -> Result<Value, ExecutionError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(ExecutionError::failed("always fails"))
    }
}

impl AttemptCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn register(&self, catalog: FactoryCatalog) -> FactoryCatalog {
        let attempts = Arc::clone(&self.0);
        catalog.register(
            "test:counted_fail",
            move |_ctx: &ModuleContext| -> anyhow::Result<ModuleInstance> {
                Ok(ModuleInstance::executor(CountedFail(Arc::clone(&attempts))))
            },
        )
    }
}
