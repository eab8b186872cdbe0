//! Error types for task submission and execution

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single task execution, delivered to whoever waits on it
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskError {
    /// No handler is registered under the task name
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// The handler returned an error
    #[error("Task failed: {0}")]
    Failed(String),

    /// The handler panicked
    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Create a handler failure
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::Failed(msg.into())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::Failed(format!("Invalid payload: {}", err))
    }
}

impl From<QueueError> for TaskError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Task(inner) => inner,
            other => TaskError::Failed(other.to_string()),
        }
    }
}

/// Errors seen by code submitting tasks or waiting on their results
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue has been shut down
    #[error("Task queue is closed")]
    Closed,

    #[error("Timed out after {0:?} waiting for task result")]
    Timeout(Duration),

    /// The worker went away before replying
    #[error("Task was dropped before producing a result")]
    Canceled,

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Result type alias for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;
