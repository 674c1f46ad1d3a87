//! Task records and the request shape used to submit them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::types::{ModuleId, TaskId, TaskType};

/// Priority tier. Lanes are scanned in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    #[default]
    Normal,
    Batch,
}

impl Priority {
    /// All tiers in dispatch order.
    pub const ALL: [Priority; 3] = [Priority::Urgent, Priority::Normal, Priority::Batch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::Normal => "normal",
            Self::Batch => "batch",
        }
    }

    pub(crate) fn lane_index(&self) -> usize {
        match self {
            Self::Urgent => 0,
            Self::Normal => 1,
            Self::Batch => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urgent" => Ok(Self::Urgent),
            "normal" => Ok(Self::Normal),
            "batch" => Ok(Self::Batch),
            other => Err(format!("unknown priority `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `failed` counts as terminal here: a failed task only leaves that state
    /// through the queue's own retry transition, never through callers.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown task status `{}`", other)),
        }
    }
}

/// Why a task attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The executor returned an error.
    ExecutionFailed,
    /// The attempt exceeded the task deadline.
    Timeout,
    /// No ready executor accepted the task. Never retried.
    NoCapableExecutor,
    /// The executor panicked while running the task.
    ExecutorPanicked,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::NoCapableExecutor => "NO_CAPABLE_EXECUTOR",
            Self::ExecutorPanicked => "EXECUTOR_PANICKED",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoCapableExecutor)
    }
}

/// Error recorded on a failed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A unit of submitted work.
///
/// The store owns the authoritative record; everything else works on clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub description: String,
    pub parameters: Map<String, Value>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Present only when `status == completed`.
    pub result: Option<Value>,
    /// Present only when `status == failed`.
    pub error: Option<TaskFailure>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Per-attempt deadline in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Module that ran (or is running) the latest attempt.
    pub executor: Option<ModuleId>,
    /// Set when cancellation was requested while the task was running.
    pub cancel_requested: bool,
}

impl Task {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Look up a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}

/// Submission request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl NewTask {
    pub fn new(task_type: impl Into<TaskType>) -> Self {
        Self {
            task_type: task_type.into(),
            description: String::new(),
            parameters: Map::new(),
            priority: None,
            max_retries: None,
            timeout_secs: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_lane_order() {
        let indices: Vec<usize> = Priority::ALL.iter().map(|p| p.lane_index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_priority_from_str() {
        assert_eq!("urgent".parse::<Priority>().unwrap(), Priority::Urgent);
        assert!("high".parse::<Priority>().is_err());
    }

    #[test]
    fn test_new_task_deserialize_defaults() {
        let req: NewTask = serde_json::from_value(json!({
            "type": "generation",
            "parameters": {"command": "echo", "args": ["hi"]}
        }))
        .unwrap();

        assert_eq!(req.task_type.as_str(), "generation");
        assert!(req.priority.is_none());
        assert!(req.max_retries.is_none());
        assert_eq!(req.parameters["command"], json!("echo"));
    }

    #[test]
    fn test_failure_kind_retryable() {
        assert!(FailureKind::ExecutionFailed.is_retryable());
        assert!(FailureKind::Timeout.is_retryable());
        assert!(!FailureKind::NoCapableExecutor.is_retryable());
        assert_eq!(
            serde_json::to_value(FailureKind::NoCapableExecutor).unwrap(),
            json!("NO_CAPABLE_EXECUTOR")
        );
    }

    #[test]
    fn test_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }
}
