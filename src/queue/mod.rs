//! Priority execution queue.
//!
//! Submitted tasks wait in one of three lanes (urgent, normal, batch) and are
//! pulled by a fixed pool of workers. A worker always takes the head of the
//! highest non-empty lane. Only lane mutation is serialized; each task's
//! handler runs on its own tokio task, so workers never block each other.

mod lanes;
pub mod stats;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{TaskError, TaskResult};
use crate::modules::CapabilityRouter;
use crate::task::{NewTask, Priority, Task, TaskStatus, TaskStore, Transition};
use crate::types::TaskId;

use lanes::Lanes;
pub use stats::{ExecutorCounts, LaneDepths, QueueStats, WorkerStats};
use stats::{QueueCounters, load};

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub workers: usize,
    pub default_max_retries: u32,
    /// Deadline for tasks that do not carry their own.
    pub default_timeout: Option<Duration>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: 3,
            default_max_retries: 0,
            default_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// State shared between the queue handle, the supervisor and the workers.
pub(crate) struct Shared {
    pub store: Arc<TaskStore>,
    pub router: CapabilityRouter,
    pub lanes: Mutex<Lanes>,
    /// Signalled when a task id is pushed onto a lane.
    pub wake: Notify,
    /// Signalled whenever a task reaches a terminal state.
    pub settled: Notify,
    /// Cancellation tokens of tasks currently executing.
    pub running: Mutex<HashMap<TaskId, CancellationToken>>,
    pub shutdown: CancellationToken,
    pub busy: AtomicUsize,
    pub counters: QueueCounters,
}

impl Shared {
    pub async fn enqueue(&self, priority: Priority, id: TaskId) {
        self.lanes.lock().await.push(priority, id);
        self.wake.notify_one();
    }
}

/// Retries go `running -> pending` directly, so `failed` is always final.
fn is_settled(task: &Task) -> bool {
    task.status.is_terminal()
}

pub struct ExecutionQueue {
    shared: Arc<Shared>,
    settings: QueueSettings,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionQueue {
    pub fn new(store: Arc<TaskStore>, router: CapabilityRouter, settings: QueueSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                router,
                lanes: Mutex::new(Lanes::default()),
                wake: Notify::new(),
                settled: Notify::new(),
                running: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                busy: AtomicUsize::new(0),
                counters: QueueCounters::default(),
            }),
            settings,
            supervisor: Mutex::new(None),
        }
    }

    /// Spawn the worker pool. Calling `start` twice has no effect.
    pub async fn start(&self) {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.is_some() || self.shared.shutdown.is_cancelled() {
            return;
        }
        info!("Starting execution queue with {} worker(s)", self.settings.workers);
        *supervisor = Some(tokio::spawn(worker::supervise(
            Arc::clone(&self.shared),
            self.settings.workers,
        )));
    }

    /// Stop accepting submissions and wait for every worker to finish its
    /// current task. Queued tasks stay `pending`.
    pub async fn shutdown(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        info!("Shutting down execution queue");
        self.shared.shutdown.cancel();

        let handle = self.supervisor.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Queue supervisor ended abnormally: {}", e);
            }
        }
        info!("Execution queue stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.shared.shutdown.is_cancelled()
    }

    pub async fn submit(&self, request: NewTask) -> TaskResult<Task> {
        if self.shared.shutdown.is_cancelled() {
            return Err(TaskError::QueueStopped);
        }

        let default_timeout_ms = self
            .settings
            .default_timeout
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let task = self
            .shared
            .store
            .create(request, self.settings.default_max_retries, default_timeout_ms)
            .await;

        QueueCounters::bump(&self.shared.counters.submitted);
        info!(
            "Task {} submitted (type={}, priority={})",
            task.id, task.task_type, task.priority
        );
        self.shared.enqueue(task.priority, task.id.clone()).await;
        Ok(task)
    }

    /// Cancel a task. A pending task is removed from its lane and becomes
    /// `cancelled` immediately; a running task only has cancellation requested
    /// and its executor's token triggered.
    pub async fn cancel(&self, id: &TaskId) -> TaskResult<Task> {
        let task = self.shared.store.update(id, Transition::RequestCancel).await?;

        match task.status {
            TaskStatus::Cancelled => {
                self.shared.lanes.lock().await.remove(id);
                QueueCounters::bump(&self.shared.counters.cancelled);
                self.shared.settled.notify_waiters();
                info!("Task {} cancelled before dispatch", id);
            }
            TaskStatus::Running => {
                if let Some(token) = self.shared.running.lock().await.get(id) {
                    token.cancel();
                }
                info!("Cancellation requested for running task {}", id);
            }
            _ => {}
        }
        Ok(task)
    }

    pub async fn get(&self, id: &TaskId) -> TaskResult<Task> {
        self.shared.store.get(id).await
    }

    /// Wait until the task is terminal or `limit` elapses, returning the
    /// latest snapshot either way.
    pub async fn wait(&self, id: &TaskId, limit: Duration) -> TaskResult<Task> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let settled = self.shared.settled.notified();
            let task = self.shared.store.get(id).await?;
            if is_settled(&task) {
                return Ok(task);
            }
            if tokio::time::timeout_at(deadline, settled).await.is_err() {
                return self.shared.store.get(id).await;
            }
        }
    }

    pub async fn stats(&self) -> QueueStats {
        let depths = {
            let lanes = self.shared.lanes.lock().await;
            LaneDepths {
                urgent: lanes.depth(Priority::Urgent),
                normal: lanes.depth(Priority::Normal),
                batch: lanes.depth(Priority::Batch),
            }
        };
        let counters = &self.shared.counters;
        let total = self.settings.workers;
        let busy = self.shared.busy.load(Ordering::SeqCst).min(total);

        QueueStats {
            running: self.is_running(),
            lanes: depths,
            workers: WorkerStats {
                total,
                busy,
                idle: total - busy,
                restarts: load(&counters.worker_restarts),
            },
            submitted: load(&counters.submitted),
            completed: load(&counters.completed),
            failed: load(&counters.failed),
            cancelled: load(&counters.cancelled),
            retried: load(&counters.retried),
            timed_out: load(&counters.timed_out),
            by_executor: counters.by_executor().await,
        }
    }
}
