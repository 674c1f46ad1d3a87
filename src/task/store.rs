//! Authoritative in-memory record of every task.
//!
//! The map itself is behind a `RwLock` that is only written on `create`;
//! each task sits behind its own `Mutex`, so writes to one task never block
//! reads or writes of another.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};

use crate::error::{TaskError, TaskResult};
use crate::task::model::{NewTask, Priority, Task, TaskFailure, TaskStatus};
use crate::types::{ModuleId, TaskId};

/// A state change requested against a single task.
#[derive(Debug, Clone)]
pub enum Transition {
    /// `pending -> running`, bound to the executor chosen by the router.
    Start { executor: ModuleId },
    /// `running -> completed`.
    Complete { result: Value },
    /// `running -> failed`, or `pending -> failed` when the task could not be routed.
    Fail { failure: TaskFailure },
    /// `running -> pending` after a failed attempt while retries remain. The
    /// task never passes through `failed`, so a concurrent cancel always finds
    /// it live. A task already flagged `cancel_requested` becomes `cancelled`
    /// instead.
    Retry { failure: TaskFailure },
    /// `pending | running -> cancelled`.
    Cancel,
    /// Caller-initiated cancel: a pending task becomes `cancelled` at once, a
    /// running task is only flagged `cancel_requested`.
    RequestCancel,
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::Retry { .. } => "retry",
            Self::Cancel => "cancel",
            Self::RequestCancel => "request_cancel",
        }
    }
}

/// Filter for [`TaskStore::list`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub limit: Option<usize>,
}

struct Entry {
    seq: u64,
    task: Mutex<Task>,
}

#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, Arc<Entry>>>,
    next_seq: AtomicU64,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `pending` task from a submission request.
    pub async fn create(
        &self,
        request: NewTask,
        default_max_retries: u32,
        default_timeout_ms: Option<u64>,
    ) -> Task {
        let now = Utc::now();
        let task = Task {
            id: TaskId::generate(),
            task_type: request.task_type,
            description: request.description,
            parameters: request.parameters,
            priority: request.priority.unwrap_or(Priority::Normal),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(default_max_retries),
            timeout_ms: request
                .timeout_secs
                .map(|secs| secs.saturating_mul(1000))
                .or(default_timeout_ms),
            executor: None,
            cancel_requested: false,
        };

        let entry = Arc::new(Entry {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            task: Mutex::new(task.clone()),
        });
        self.tasks.write().await.insert(task.id.clone(), entry);
        task
    }

    pub async fn get(&self, id: &TaskId) -> TaskResult<Task> {
        let entry = self.entry(id).await?;
        let task = entry.task.lock().await;
        Ok(task.clone())
    }

    /// Apply a transition, returning the updated snapshot.
    pub async fn update(&self, id: &TaskId, transition: Transition) -> TaskResult<Task> {
        let entry = self.entry(id).await?;
        let mut task = entry.task.lock().await;
        apply(&mut task, transition)?;
        Ok(task.clone())
    }

    /// Tasks matching the filter, most recent first.
    pub async fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let entries: Vec<Arc<Entry>> = self.tasks.read().await.values().cloned().collect();

        let mut matched = Vec::with_capacity(entries.len());
        for entry in entries {
            let task = entry.task.lock().await;
            if filter.status.is_none_or(|s| s == task.status) {
                matched.push((entry.seq, task.clone()));
            }
        }

        matched.sort_by(|a, b| b.0.cmp(&a.0));
        let limit = filter.limit.unwrap_or(usize::MAX);
        matched.into_iter().take(limit).map(|(_, t)| t).collect()
    }

    /// Count of tasks per status.
    pub async fn counts(&self) -> HashMap<TaskStatus, usize> {
        let entries: Vec<Arc<Entry>> = self.tasks.read().await.values().cloned().collect();
        let mut counts = HashMap::new();
        for entry in entries {
            let status = entry.task.lock().await.status;
            *counts.entry(status).or_insert(0) += 1;
        }
        counts
    }

    async fn entry(&self, id: &TaskId) -> TaskResult<Arc<Entry>> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.clone()))
    }
}

fn apply(task: &mut Task, transition: Transition) -> TaskResult<()> {
    let now = Utc::now();
    let from = task.status;
    let illegal = |t: &Transition| TaskError::InvalidTransition {
        id: task.id.clone(),
        from,
        transition: t.name(),
    };

    match (&transition, from) {
        (Transition::Start { executor }, TaskStatus::Pending) => {
            task.status = TaskStatus::Running;
            task.started_at = Some(now);
            task.executor = Some(executor.clone());
        }
        (Transition::Complete { result }, TaskStatus::Running) => {
            task.status = TaskStatus::Completed;
            task.result = Some(result.clone());
            task.completed_at = Some(now);
        }
        (Transition::Fail { failure }, TaskStatus::Running | TaskStatus::Pending) => {
            task.status = TaskStatus::Failed;
            task.error = Some(failure.clone());
            task.completed_at = Some(now);
        }
        (Transition::Retry { .. }, TaskStatus::Running) => {
            if task.retry_count >= task.max_retries {
                return Err(illegal(&transition));
            }
            if task.cancel_requested {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(now);
            } else {
                task.retry_count += 1;
                task.status = TaskStatus::Pending;
                task.error = None;
                task.started_at = None;
                task.completed_at = None;
            }
        }
        (Transition::Cancel, TaskStatus::Pending | TaskStatus::Running) => {
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(now);
        }
        (Transition::Cancel | Transition::RequestCancel, status) if status.is_terminal() => {
            return Err(TaskError::AlreadyTerminal {
                id: task.id.clone(),
                status,
            });
        }
        (Transition::RequestCancel, TaskStatus::Pending) => {
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(now);
        }
        (Transition::RequestCancel, TaskStatus::Running) => {
            task.cancel_requested = true;
        }
        _ => return Err(illegal(&transition)),
    }

    task.updated_at = now;
    Ok(())
}
