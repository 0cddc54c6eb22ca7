// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operations for the write-ahead log
//!
//! Each operation carries the full post-image of the record it touches, so
//! replaying the same entry twice leaves the state unchanged.

use crate::history::HistoryEntry;
use crate::repository::Repository;
use crate::schedule::{Schedule, ScheduleId};
use crate::task::TaskRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operations that can be persisted to the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Record a newly dispatched (or directly rejected) task
    TaskCreate { record: TaskRecord },

    /// Replace a task record after a state transition
    TaskTransition { record: TaskRecord },

    /// Create or replace a schedule
    ScheduleSave { schedule: Schedule },

    /// Delete a schedule
    ScheduleDelete { id: ScheduleId },

    /// Create or replace a repository catalog entry
    RepositorySave { repository: Repository },

    /// Delete a repository catalog entry and its history
    RepositoryDelete { id: String },

    /// Append a sync or publish history entry
    HistoryRecord { entry: HistoryEntry },

    /// Drop terminal tasks finished before `tasks_before` and history
    /// completed before `history_before`
    Prune {
        tasks_before: Option<DateTime<Utc>>,
        history_before: Option<DateTime<Utc>>,
    },
}

impl Operation {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Operation::TaskCreate { .. } => "task_create",
            Operation::TaskTransition { .. } => "task_transition",
            Operation::ScheduleSave { .. } => "schedule_save",
            Operation::ScheduleDelete { .. } => "schedule_delete",
            Operation::RepositorySave { .. } => "repository_save",
            Operation::RepositoryDelete { .. } => "repository_delete",
            Operation::HistoryRecord { .. } => "history_record",
            Operation::Prune { .. } => "prune",
        }
    }
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
