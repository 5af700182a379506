//! Workflow task types.
//!
//! A `WorkflowTask` is owned exclusively by the sequencer that created it.
//! Callers only ever see snapshot clones returned by status queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a workflow task.
///
/// Transitions are monotonic: `Pending -> Running -> {Completed | Failed}`,
/// or `Pending -> Failed` when a dependency failed. A task is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether the task has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("invalid task status: '{other}'")),
        }
    }
}

/// A single unit of work in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    /// UUIDv7 task ID.
    pub id: Uuid,
    /// Registered task type name used to look up the handler.
    pub task_type: String,
    pub payload: Map<String, Value>,
    /// Tasks that must reach `Completed` before this one may run.
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowTask {
    /// Create a new pending task.
    pub fn new(task_type: impl Into<String>, payload: Map<String, Value>, dependencies: Vec<Uuid>) -> Self {
        Self {
            id: Uuid::now_v7(),
            task_type: task_type.into(),
            payload,
            dependencies,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

/// Lifecycle events published by the sequencer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SequencerEvent {
    TaskStarted {
        task_id: Uuid,
        task_type: String,
    },
    TaskCompleted {
        task_id: Uuid,
        task_type: String,
    },
    TaskFailed {
        task_id: Uuid,
        task_type: String,
        error: String,
    },
}

impl SequencerEvent {
    pub fn task_id(&self) -> Uuid {
        match self {
            SequencerEvent::TaskStarted { task_id, .. }
            | SequencerEvent::TaskCompleted { task_id, .. }
            | SequencerEvent::TaskFailed { task_id, .. } => *task_id,
        }
    }
}
