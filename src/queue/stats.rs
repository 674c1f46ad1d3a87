//! Queue counters and the statistics snapshot.
//!
//! Counters are plain atomics updated by workers without coordination, so a
//! snapshot is eventually consistent: lane depths and counters may be read a
//! few instructions apart.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::types::ModuleId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorCounts {
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub retried: AtomicU64,
    pub timed_out: AtomicU64,
    pub worker_restarts: AtomicU64,
    by_executor: Mutex<BTreeMap<ModuleId, ExecutorCounts>>,
}

impl QueueCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_executor(&self, executor: &ModuleId, succeeded: bool) {
        let mut by_executor = self.by_executor.lock().await;
        let counts = by_executor.entry(executor.clone()).or_default();
        if succeeded {
            counts.completed += 1;
        } else {
            counts.failed += 1;
        }
    }

    pub async fn by_executor(&self) -> BTreeMap<ModuleId, ExecutorCounts> {
        self.by_executor.lock().await.clone()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LaneDepths {
    pub urgent: usize,
    pub normal: usize,
    pub batch: usize,
}

impl LaneDepths {
    pub fn total(&self) -> usize {
        self.urgent + self.normal + self.batch
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WorkerStats {
    pub total: usize,
    pub busy: usize,
    pub idle: usize,
    pub restarts: u64,
}

/// Read-only snapshot returned by the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub running: bool,
    pub lanes: LaneDepths,
    pub workers: WorkerStats,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retried: u64,
    pub timed_out: u64,
    pub by_executor: BTreeMap<ModuleId, ExecutorCounts>,
}

pub(crate) fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}
