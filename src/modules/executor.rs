//! The contract a loaded module implements.
//!
//! Every module has a setup and a teardown hook. Executor modules also expose
//! a capability test and a task execution operation.
//!
//! Cancellation is cooperative. `execute` receives a [`CancellationToken`]
//! and long-running work is obliged to check it at bounded intervals (or
//! `select!` on `cancelled()`) and return [`ExecutionError::Cancelled`]. The
//! engine never preempts a running handler on a user cancel; an executor that
//! ignores the token simply runs to completion and its result stands.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::task::Task;

#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// The executor observed the cancellation token and stopped early.
    #[error("execution cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl ExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Setup/teardown hooks shared by every module type.
#[async_trait]
pub trait ModuleLifecycle: Send + Sync {
    /// Called once before the module becomes `ready`. An error leaves the
    /// module `failed`.
    async fn setup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release every resource held by the module. Must not fail.
    async fn teardown(&self) {}
}

#[async_trait]
pub trait Executor: ModuleLifecycle {
    /// Pure, fast check whether this executor can run `task`. Called after the
    /// manifest's capability tags already matched the task type.
    fn can_handle(&self, _task: &Task) -> bool {
        true
    }

    /// Run one attempt of `task`. `task` is a snapshot; mutating it has no
    /// effect on the stored record.
    async fn execute(&self, task: Task, cancel: CancellationToken) -> Result<Value, ExecutionError>;
}

/// Live implementation bound to a loaded module.
#[derive(Clone)]
pub enum ModuleInstance {
    Executor(Arc<dyn Executor>),
    /// Orchestrator, analyzer or integration modules: lifecycle only.
    Component(Arc<dyn ModuleLifecycle>),
}

impl ModuleInstance {
    pub fn executor<E: Executor + 'static>(executor: E) -> Self {
        Self::Executor(Arc::new(executor))
    }

    pub fn component<C: ModuleLifecycle + 'static>(component: C) -> Self {
        Self::Component(Arc::new(component))
    }

    pub fn as_executor(&self) -> Option<&Arc<dyn Executor>> {
        match self {
            Self::Executor(executor) => Some(executor),
            Self::Component(_) => None,
        }
    }

    pub async fn setup(&self) -> anyhow::Result<()> {
        match self {
            Self::Executor(e) => e.setup().await,
            Self::Component(c) => c.setup().await,
        }
    }

    pub async fn teardown(&self) {
        match self {
            Self::Executor(e) => e.teardown().await,
            Self::Component(c) => c.teardown().await,
        }
    }
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Executor(_) => f.write_str("ModuleInstance::Executor"),
            Self::Component(_) => f.write_str("ModuleInstance::Component"),
        }
    }
}
