//! Worker loop and pool supervision.
//!
//! Each worker repeats dequeue, route, mark running, execute, record. The
//! executor call itself runs on a separate tokio task so a panicking or
//! runaway handler cannot take the worker down with it.

use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::modules::{ExecutionError, Executor, ModuleLease};
use crate::queue::Shared;
use crate::queue::stats::QueueCounters;
use crate::task::{FailureKind, Task, TaskFailure, TaskStatus, Transition};
use crate::types::{ModuleId, TaskId};

/// Outcome of one execution attempt, before it is written to the store.
#[derive(Debug)]
enum Attempt {
    Completed(Value),
    Cancelled,
    Failed(TaskFailure),
}

/// Run `workers` worker loops until shutdown, restarting any that die.
pub(crate) async fn supervise(shared: Arc<Shared>, workers: usize) {
    let mut pool = JoinSet::new();
    let mut worker_ids = HashMap::new();

    for worker_id in 0..workers {
        let handle = pool.spawn(run(Arc::clone(&shared), worker_id));
        worker_ids.insert(handle.id(), worker_id);
    }

    while let Some(joined) = pool.join_next_with_id().await {
        let (task_id, worker_id, reason) = match joined {
            Ok((task_id, ())) => {
                let worker_id = worker_ids.get(&task_id).copied().unwrap_or_default();
                (task_id, worker_id, None)
            }
            Err(e) => {
                let worker_id = worker_ids.get(&e.id()).copied().unwrap_or_default();
                (e.id(), worker_id, Some(e.to_string()))
            }
        };
        worker_ids.remove(&task_id);

        if shared.shutdown.is_cancelled() {
            continue;
        }

        error!(
            "Worker {} exited unexpectedly ({}); restarting",
            worker_id,
            reason.as_deref().unwrap_or("returned")
        );
        QueueCounters::bump(&shared.counters.worker_restarts);
        let handle = pool.spawn(run(Arc::clone(&shared), worker_id));
        worker_ids.insert(handle.id(), worker_id);
    }

    debug!("All workers stopped");
}

/// Marks a worker busy for as long as it is alive.
struct BusyGuard<'a>(&'a AtomicUsize);

impl<'a> BusyGuard<'a> {
    fn new(busy: &'a AtomicUsize) -> Self {
        busy.fetch_add(1, Ordering::SeqCst);
        Self(busy)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run(shared: Arc<Shared>, worker_id: usize) {
    info!("Worker {} started", worker_id);

    loop {
        if shared.shutdown.is_cancelled() {
            break;
        }

        let next = {
            let mut lanes = shared.lanes.lock().await;
            let next = lanes.pop();
            // Pass the wakeup on so another idle worker picks up the rest.
            if next.is_some() && !lanes.is_empty() {
                shared.wake.notify_one();
            }
            next
        };

        let Some(id) = next else {
            tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                _ = shared.wake.notified() => {}
            }
            continue;
        };

        let _busy = BusyGuard::new(&shared.busy);
        process(&shared, worker_id, id).await;
    }

    info!("Worker {} stopped", worker_id);
}

async fn process(shared: &Shared, worker_id: usize, id: TaskId) {
    let task = match shared.store.get(&id).await {
        Ok(task) if task.status == TaskStatus::Pending => task,
        Ok(task) => {
            debug!("Skipping task {} in state {}", id, task.status);
            return;
        }
        Err(e) => {
            warn!("Dequeued unknown task {}: {}", id, e);
            return;
        }
    };

    let lease = match shared.router.select(&task).await {
        Ok(lease) => Arc::new(lease),
        Err(e) => {
            fail_unroutable(shared, &task, e.to_string()).await;
            return;
        }
    };
    let Some(executor) = lease.executor() else {
        fail_unroutable(shared, &task, format!("module {} is not an executor", lease.id())).await;
        return;
    };
    let executor_id = lease.id().clone();

    // Register the token before the task is visibly running so a cancel that
    // observes `running` always finds it.
    let token = CancellationToken::new();
    shared
        .running
        .lock()
        .await
        .insert(id.clone(), token.clone());

    let started = match shared
        .store
        .update(
            &id,
            Transition::Start {
                executor: executor_id.clone(),
            },
        )
        .await
    {
        Ok(task) => task,
        Err(e) => {
            shared.running.lock().await.remove(&id);
            debug!("Task {} not started: {}", id, e);
            return;
        }
    };

    info!(
        "Worker {} running task {} (attempt {}) on {}",
        worker_id,
        id,
        started.retry_count + 1,
        executor_id
    );

    let attempt = execute(executor, Arc::clone(&lease), started.clone(), token).await;
    shared.running.lock().await.remove(&id);
    record(shared, &started, &executor_id, attempt).await;

    // The module stays in flight until the outcome is stored.
    drop(lease);
}

async fn fail_unroutable(shared: &Shared, task: &Task, message: String) {
    warn!("Task {} could not be routed: {}", task.id, message);
    let failure = TaskFailure::new(FailureKind::NoCapableExecutor, message);
    if shared
        .store
        .update(&task.id, Transition::Fail { failure })
        .await
        .is_ok()
    {
        QueueCounters::bump(&shared.counters.failed);
        shared.settled.notify_waiters();
    }
}

/// Run one attempt on its own tokio task, enforcing the task deadline.
async fn execute(
    executor: Arc<dyn Executor>,
    lease: Arc<ModuleLease>,
    task: Task,
    token: CancellationToken,
) -> Attempt {
    let timeout = task.timeout();
    let handler_token = token.clone();
    let mut handle = tokio::spawn(async move {
        // An abandoned handler keeps its module in flight until it returns.
        let _lease = lease;
        executor.execute(task, handler_token).await
    });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                token.cancel();
                handle.abort();
                return Attempt::Failed(TaskFailure::new(
                    FailureKind::Timeout,
                    format!("execution exceeded {:?} deadline", limit),
                ));
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(Ok(result)) => Attempt::Completed(result),
        Ok(Err(ExecutionError::Cancelled)) => Attempt::Cancelled,
        Ok(Err(ExecutionError::Failed(message))) => {
            Attempt::Failed(TaskFailure::new(FailureKind::ExecutionFailed, message))
        }
        Err(e) if e.is_panic() => Attempt::Failed(TaskFailure::new(
            FailureKind::ExecutorPanicked,
            format!("executor panicked: {}", panic_message(e.into_panic())),
        )),
        Err(e) => Attempt::Failed(TaskFailure::new(
            FailureKind::ExecutorPanicked,
            e.to_string(),
        )),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn record(shared: &Shared, task: &Task, executor: &ModuleId, attempt: Attempt) {
    let id = &task.id;

    match attempt {
        Attempt::Completed(result) => {
            match shared
                .store
                .update(id, Transition::Complete { result })
                .await
            {
                Ok(_) => {
                    QueueCounters::bump(&shared.counters.completed);
                    shared.counters.record_executor(executor, true).await;
                    info!("Task {} completed on {}", id, executor);
                }
                Err(e) => warn!("Could not record completion of task {}: {}", id, e),
            }
        }
        Attempt::Cancelled => finish_cancelled(shared, id).await,
        Attempt::Failed(failure) => {
            shared.counters.record_executor(executor, false).await;
            if failure.kind == FailureKind::Timeout {
                QueueCounters::bump(&shared.counters.timed_out);
            }

            let cancel_requested = shared
                .store
                .get(id)
                .await
                .map(|t| t.cancel_requested)
                .unwrap_or(false);
            if cancel_requested {
                finish_cancelled(shared, id).await;
            } else {
                record_failure(shared, task, failure).await;
            }
        }
    }
    shared.settled.notify_waiters();
}

async fn record_failure(shared: &Shared, task: &Task, failure: TaskFailure) {
    let id = &task.id;
    let attempts = task.retry_count + 1;
    let retry = failure.kind.is_retryable() && task.retry_count < task.max_retries;

    if retry {
        let message = failure.message.clone();
        match shared.store.update(id, Transition::Retry { failure }).await {
            Ok(next) if next.status == TaskStatus::Cancelled => {
                QueueCounters::bump(&shared.counters.cancelled);
                info!("Task {} cancelled instead of retried", id);
            }
            Ok(next) => {
                QueueCounters::bump(&shared.counters.retried);
                info!(
                    "Task {} failed ({}); retry {}/{}",
                    id, message, next.retry_count, next.max_retries
                );
                shared.enqueue(next.priority, next.id).await;
            }
            Err(e) => warn!("Could not retry task {}: {}", id, e),
        }
        return;
    }

    let failure = if attempts > 1 {
        TaskFailure::new(
            failure.kind,
            format!("{} (after {} attempts)", failure.message, attempts),
        )
    } else {
        failure
    };
    let message = failure.message.clone();

    match shared.store.update(id, Transition::Fail { failure }).await {
        Ok(_) => {
            QueueCounters::bump(&shared.counters.failed);
            warn!("Task {} failed: {}", id, message);
        }
        Err(e) => warn!("Could not record failure of task {}: {}", id, e),
    }
}

async fn finish_cancelled(shared: &Shared, id: &TaskId) {
    match shared.store.update(id, Transition::Cancel).await {
        Ok(_) => {
            QueueCounters::bump(&shared.counters.cancelled);
            info!("Task {} cancelled", id);
        }
        Err(e) => warn!("Could not record cancellation of task {}: {}", id, e),
    }
}
