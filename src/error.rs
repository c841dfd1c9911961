//! Error taxonomy for the board engine.
//!
//! - `ValidationError` is rejected before any write is issued.
//! - `BoardError::WriteFailure` follows an optimistic mutation that has been
//!   rolled back.
//! - `BoardError::SubscriptionFailure` reports a broken change feed.

use std::time::{Duration, Instant};

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum ValidationError {
    #[error("task title cannot be empty")]
    EmptyTitle,

    #[error("status name cannot be empty")]
    EmptyStatusName,

    #[error("project name cannot be empty")]
    EmptyProjectName,

    #[error("task {0} not found")]
    UnknownTask(Uuid),

    #[error("status {0} not found")]
    UnknownStatus(Uuid),

    #[error("another edit is already in progress")]
    EditInProgress,

    #[error("task {0} is being dragged")]
    TaskBusy(Uuid),
}

#[derive(Debug, Error)]
pub enum BoardError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{operation} failed for {entity}: {message}")]
    WriteFailure {
        operation: WriteOperation,
        entity: Uuid,
        message: String,
    },

    #[error("change feed unavailable: {0}")]
    SubscriptionFailure(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl BoardError {
    pub fn is_validation(&self) -> bool {
        matches!(self, BoardError::Validation(_))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteOperation {
    MoveTask,
    RenameTask,
    UpdateTask,
    RenameStatus,
    CreateTask,
    DeleteTask,
}

impl WriteOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteOperation::MoveTask => "move task",
            WriteOperation::RenameTask => "rename task",
            WriteOperation::UpdateTask => "update task",
            WriteOperation::RenameStatus => "rename status",
            WriteOperation::CreateTask => "create task",
            WriteOperation::DeleteTask => "delete task",
        }
    }

    fn notice_title(self) -> &'static str {
        match self {
            WriteOperation::MoveTask => "Error moving task",
            WriteOperation::RenameTask | WriteOperation::UpdateTask => "Error updating task",
            WriteOperation::RenameStatus => "Error renaming column",
            WriteOperation::CreateTask => "Error creating task",
            WriteOperation::DeleteTask => "Error deleting task",
        }
    }
}

impl std::fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Transient, user-visible message. Never blocks the board.
#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub detail: Option<String>,
    pub raised_at: Instant,
}

impl Notice {
    pub fn info(title: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: title.into(),
            detail: None,
            raised_at: Instant::now(),
        }
    }

    pub fn error(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            detail: Some(detail.into()),
            raised_at: Instant::now(),
        }
    }

    pub fn from_error(err: &BoardError) -> Self {
        match err {
            BoardError::WriteFailure {
                operation, message, ..
            } => Self::error(operation.notice_title(), message.clone()),
            BoardError::SubscriptionFailure(detail) => {
                Self::error("Live updates interrupted", detail.clone())
            }
            BoardError::Validation(err) => Self::error("Invalid input", err.to_string()),
            BoardError::Store(err) => Self::error("Storage error", format!("{err:#}")),
        }
    }

    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.raised_at) >= ttl
    }
}
