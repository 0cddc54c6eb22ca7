// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the dispatch engine

use depot_core::{RepositoryError, ScheduleError, TaskError};
use depot_plugins::PluginError;
use depot_storage::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Errors from acquiring a resource reservation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    #[error("reservation manager is shut down")]
    Unavailable,
    #[error("timed out after {waited:?} waiting for {resource_id}")]
    TimedOut {
        resource_id: String,
        waited: Duration,
    },
}

impl ReservationError {
    /// Error recorded on the REJECTED task
    pub fn to_task_error(&self) -> TaskError {
        let kind = match self {
            ReservationError::Unavailable => "reservation_failure",
            ReservationError::TimedOut { .. } => "reservation_timeout",
        };
        TaskError::new(kind, self.to_string())
    }
}

/// Errors from the dispatcher itself
///
/// Anything that goes wrong after the record is persisted lands on the
/// record instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors returned by operation handlers
#[derive(Debug, Error)]
pub enum WorkError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("canceled")]
    Canceled,
    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl WorkError {
    pub fn validation(message: impl Into<String>) -> Self {
        WorkError::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        WorkError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(
            self,
            WorkError::Canceled | WorkError::Plugin(PluginError::Canceled)
        )
    }

    /// Structured error stored on the FAILED record
    pub fn to_task_error(&self) -> TaskError {
        match self {
            WorkError::Validation(_) => TaskError::new("validation", self.to_string()),
            WorkError::NotFound { .. } => TaskError::new("not_found", self.to_string()),
            WorkError::Plugin(err) => TaskError::new("work_execution", "plugin call failed")
                .with_cause(TaskError::new(err.kind(), err.to_string())),
            WorkError::Store(err) if err.is_not_found() => {
                TaskError::new("not_found", err.to_string())
            }
            WorkError::Store(err) => TaskError::new("storage", err.to_string()),
            WorkError::Canceled => TaskError::new("canceled", self.to_string()),
            WorkError::Panicked(_) => TaskError::new("worker_lost", self.to_string()),
        }
    }
}

/// Errors surfaced synchronously by [`RepositoryService`](crate::RepositoryService)
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} already exists: {id}")]
    Conflict { kind: &'static str, id: String },
    #[error("storage error: {0}")]
    Storage(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ServiceError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable category used by the control protocol
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation",
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::Conflict { .. } => "conflict",
            ServiceError::Storage(_) => "storage",
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => ServiceError::NotFound { kind, id },
            StoreError::Conflict { kind, id } => ServiceError::Conflict { kind, id },
            StoreError::Validation(message) => ServiceError::Validation(message),
            StoreError::Schedule(err) => ServiceError::Validation(err.to_string()),
            StoreError::Transition(err) => ServiceError::Validation(err.to_string()),
            StoreError::Wal(err) => ServiceError::Storage(err.to_string()),
            StoreError::Snapshot(err) => ServiceError::Storage(err.to_string()),
        }
    }
}

impl From<DispatchError> for ServiceError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Store(err) => err.into(),
        }
    }
}

impl From<ScheduleError> for ServiceError {
    fn from(err: ScheduleError) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

impl From<WorkError> for ServiceError {
    fn from(err: WorkError) -> Self {
        match err {
            WorkError::Validation(message) => ServiceError::Validation(message),
            WorkError::NotFound { kind, id } => ServiceError::NotFound { kind, id },
            WorkError::Store(err) => err.into(),
            other => ServiceError::Storage(other.to_string()),
        }
    }
}
