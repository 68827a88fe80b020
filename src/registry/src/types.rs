//! Core data model: [`Task`], [`Priority`], [`TaskState`], [`TaskOptions`].
//!
//! `Priority` is a discriminant-as-weight enum, `Task` a flat struct with
//! `SystemTime`-based timestamps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Unique identifier for a task. A plain `String` rather than a `Uuid`:
/// callers choose their own id scheme (only global uniqueness is
/// required, not a particular format).
pub type TaskId = String;

/// Task priority, used by the `priority` dispatch policy's weighting and
/// as a hint available to handlers. `CRITICAL` is the highest priority;
/// ordering follows the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Execution state of a task. `Display`/`FromStr` round-trip exactly to
/// the wire strings the store's `group:{g}:state` hash uses:
/// `waiting`, `active`, `completed`, `failed`, `delayed`, `paused`,
/// `unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Paused,
    Unknown,
}

impl TaskState {
    /// A terminal state is never followed by a non-terminal one
    /// (invariant d).
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Waiting => "waiting",
            TaskState::Active => "active",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Delayed => "delayed",
            TaskState::Paused => "paused",
            TaskState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(TaskState::Waiting),
            "active" => Ok(TaskState::Active),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            "delayed" => Ok(TaskState::Delayed),
            "paused" => Ok(TaskState::Paused),
            "unknown" => Ok(TaskState::Unknown),
            other => Err(format!("unrecognized task state: {other}")),
        }
    }
}

/// Per-task scheduling and retry options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOptions {
    #[serde(default)]
    pub priority: Priority,
    /// Maximum number of retries after the first attempt. `attempts` may
    /// never exceed `max_retries + 1`.
    #[serde(default)]
    pub max_retries: u32,
    /// Base backoff delay in milliseconds; the worker pool multiplies
    /// this by `2^(attempts-1)` per retry, capped.
    #[serde(default)]
    pub retry_delay_ms: u64,
    /// If set and in the future at submission time, the task starts in
    /// `DELAYED` rather than `WAITING`.
    #[serde(default)]
    pub not_before: Option<SystemTime>,
    /// Per-task execution timeout, enforced by the Worker Pool. `None`
    /// means no timeout beyond the handler's own behavior.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Target queue, consulted by the Submit API when a producer doesn't
    /// address a queue directly. `None` routes to the engine's default
    /// queue.
    #[serde(default)]
    pub queue: Option<String>,
    /// Group label. `None` resolves to the synthetic per-queue group
    /// (see "ungrouped tasks" handling in the group manager).
    #[serde(default)]
    pub group: Option<String>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            priority: Priority::default(),
            max_retries: 0,
            retry_delay_ms: 0,
            not_before: None,
            timeout_ms: None,
            queue: None,
            group: None,
        }
    }
}

/// A unit of work tracked by the registry.
///
/// `payload` is opaque from the registry's point of view: it is whatever
/// serialized bytes the producer attached, interpreted only by the
/// handler named in `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub queue: String,
    pub group: Option<String>,
    pub payload: Vec<u8>,
    pub method: String,
    pub options: TaskOptions,
    pub state: TaskState,
    pub attempts: u32,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    pub last_error: Option<String>,
}

impl Task {
    /// Build a new task in its initial state: `WAITING` unless
    /// `options.not_before` is in the future, in which case `DELAYED`.
    pub fn new(id: impl Into<TaskId>, queue: impl Into<String>, method: impl Into<String>, payload: Vec<u8>, group: Option<String>, options: TaskOptions) -> Self {
        let now = SystemTime::now();
        let state = match options.not_before {
            Some(not_before) if not_before > now => TaskState::Delayed,
            _ => TaskState::Waiting,
        };
        Self {
            id: id.into(),
            queue: queue.into(),
            group,
            payload,
            method: method.into(),
            options,
            state,
            attempts: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }
}
