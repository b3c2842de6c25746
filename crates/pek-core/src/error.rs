use crate::args::TaskId;
use thiserror::Error;

pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Raised when an early terminator is built with an action outside the allowed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EarlyTerminationError {
    #[error("invalid action value: {action}. Allowed values are [notify, kill]")]
    InvalidAction { action: String },

    #[error("unknown early terminator '{name}'. Must be one of [{allowed}]")]
    UnknownCatalogEntry { name: String, allowed: String },
}

/// Configuration and lifecycle-precondition failures for a single task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task {task_id}: cannot set args while the task is not pending")]
    NotPending { task_id: TaskId },

    #[error("task {task_id} has already been started")]
    AlreadyStarted { task_id: TaskId },

    #[error("task {task_id} is not running")]
    NotRunning { task_id: TaskId },

    #[error("task {task_id} is not paused")]
    NotPaused { task_id: TaskId },

    #[error("task {task_id}: invalid value for early termination: {reason}")]
    InvalidEarlyTermination { task_id: TaskId, reason: String },

    #[error("task {task_id}: invalid args: {reason}")]
    InvalidArgs { task_id: TaskId, reason: String },
}

impl TaskError {
    /// Id of the task the error refers to.
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::NotPending { task_id }
            | Self::AlreadyStarted { task_id }
            | Self::NotRunning { task_id }
            | Self::NotPaused { task_id }
            | Self::InvalidEarlyTermination { task_id, .. }
            | Self::InvalidArgs { task_id, .. } => task_id,
        }
    }
}

/// A streamed partial result could not be decoded.
#[derive(Debug, Error)]
#[error("malformed partial result: {0}")]
pub struct DecodeError(#[from] pub serde_json::Error);
