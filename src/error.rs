use thiserror::Error;

use crate::id::{IdParseError, TaskId};
use crate::types::{EdgeKind, TaskStatus};

/// Boundary classification of an error, independent of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    DependencyCycle,
    BusinessRule,
    Conflict,
    Internal,
}

impl ErrorKind {
    /// HTTP-class status code for callers that speak HTTP.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Validation | ErrorKind::DependencyCycle => 422,
            ErrorKind::BusinessRule | ErrorKind::Conflict => 409,
            ErrorKind::Internal => 500,
        }
    }
}

#[derive(Error, Debug)]
pub enum TgError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Parent task not found: {0}")]
    ParentNotFound(TaskId),

    #[error("Blocker task not found: {0}")]
    BlockerNotFound(TaskId),

    /// A bulk-import reference that matches neither a batch key nor a stored task
    #[error("Unknown import reference: {0}")]
    UnknownReference(String),

    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Invalid task id: {0}")]
    InvalidId(#[from] IdParseError),

    /// Adding the edge would close a cycle in the dependency + hierarchy graph
    #[error("Adding {kind} edge {from} -> {to} would create a cycle")]
    DependencyCycle {
        kind: EdgeKind,
        from: TaskId,
        to: TaskId,
    },

    #[error("Cannot delete task {0}: it still has subtasks")]
    HasChildren(TaskId),

    #[error("Task {task_id} has incomplete dependencies: {}", join_ids(blockers))]
    UnresolvedBlockers {
        task_id: TaskId,
        blockers: Vec<TaskId>,
    },

    #[error("Task {task_id} has incomplete children: {}", join_ids(children))]
    IncompleteChildren {
        task_id: TaskId,
        children: Vec<TaskId>,
    },

    #[error("Invalid status transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Cannot reopen task {task_id}: status is {status}, not completed")]
    CannotReopen { task_id: TaskId, status: TaskStatus },

    #[error("Completion cascade from {task_id} exceeded depth {limit}")]
    CascadeDepthExceeded { task_id: TaskId, limit: usize },

    /// Stored version differs from the one the operation read
    #[error("Task {0} was modified concurrently")]
    Conflict(TaskId),

    /// Another connection holds the write lock
    #[error("Database is busy with another writer")]
    StoreBusy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TgError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        TgError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TgError::TaskNotFound(_)
            | TgError::ParentNotFound(_)
            | TgError::BlockerNotFound(_)
            | TgError::UnknownReference(_) => ErrorKind::NotFound,
            TgError::Validation { .. } | TgError::InvalidId(_) => ErrorKind::Validation,
            TgError::DependencyCycle { .. } => ErrorKind::DependencyCycle,
            TgError::HasChildren(_)
            | TgError::UnresolvedBlockers { .. }
            | TgError::IncompleteChildren { .. }
            | TgError::InvalidTransition { .. }
            | TgError::CannotReopen { .. }
            | TgError::CascadeDepthExceeded { .. } => ErrorKind::BusinessRule,
            TgError::Conflict(_) | TgError::StoreBusy => ErrorKind::Conflict,
            TgError::Database(_) | TgError::Io(_) | TgError::Json(_) => ErrorKind::Internal,
        }
    }
}

impl TgError {
    /// SQLite busy/locked failures become `StoreBusy`; anything else stays a
    /// database error.
    pub fn from_write_lock(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref failure, _)
                if matches!(
                    failure.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                TgError::StoreBusy
            }
            other => TgError::Database(other),
        }
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, TgError>;
