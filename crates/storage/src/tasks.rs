// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable task records

use crate::error::StoreError;
use crate::journal::Journal;
use depot_core::{Clock, Operation, TaskError, TaskEvent, TaskId, TaskRecord, TaskState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Criteria for listing tasks; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub state: Option<TaskState>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.state.map_or(true, |s| record.state == s)
            && self
                .tag
                .as_ref()
                .map_or(true, |tag| record.tags.iter().any(|t| t == tag))
            && self
                .resource_id
                .as_ref()
                .map_or(true, |r| record.resource_id.as_ref() == Some(r))
    }
}

#[derive(Clone)]
pub struct TaskStore {
    journal: Arc<Journal>,
}

impl TaskStore {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self { journal }
    }

    /// Persist a new record
    pub fn create(&self, record: TaskRecord) -> Result<TaskRecord, StoreError> {
        self.journal.update(|state| {
            if state.tasks.contains_key(&record.task_id) {
                return Err(StoreError::conflict("task", record.task_id.0.clone()));
            }
            Ok((
                Some(Operation::TaskCreate {
                    record: record.clone(),
                }),
                record,
            ))
        })
    }

    pub fn get(&self, task_id: &TaskId) -> Result<TaskRecord, StoreError> {
        self.journal
            .read(|state| state.tasks.get(task_id).cloned())
            .ok_or_else(|| StoreError::not_found("task", task_id.0.clone()))
    }

    /// Records matching `filter`, oldest first
    pub fn list(&self, filter: &TaskFilter) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.journal.read(|state| {
            state
                .tasks
                .values()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect()
        });
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        records
    }

    /// Apply `event` to the stored record atomically
    pub fn transition(
        &self,
        task_id: &TaskId,
        event: TaskEvent,
        clock: &impl Clock,
    ) -> Result<TaskRecord, StoreError> {
        self.journal.update(|state| {
            let current = state
                .tasks
                .get(task_id)
                .ok_or_else(|| StoreError::not_found("task", task_id.0.clone()))?;
            let next = current.transition(event, clock)?;
            tracing::debug!(
                task_id = %task_id,
                from = %current.state,
                to = %next.state,
                "task transition"
            );
            Ok((
                Some(Operation::TaskTransition {
                    record: next.clone(),
                }),
                next,
            ))
        })
    }

    /// Apply `event` only if the record is still in `expected`
    ///
    /// Returns `Ok(None)` when the record has moved on.
    pub fn transition_from(
        &self,
        task_id: &TaskId,
        expected: TaskState,
        event: TaskEvent,
        clock: &impl Clock,
    ) -> Result<Option<TaskRecord>, StoreError> {
        self.journal.update(|state| {
            let current = state
                .tasks
                .get(task_id)
                .ok_or_else(|| StoreError::not_found("task", task_id.0.clone()))?;
            if current.state != expected {
                return Ok((None, None));
            }
            let next = current.transition(event, clock)?;
            Ok((
                Some(Operation::TaskTransition {
                    record: next.clone(),
                }),
                Some(next),
            ))
        })
    }

    /// Fail every record a previous process left WAITING or RUNNING
    pub fn fail_unfinished(&self, clock: &impl Clock) -> Result<Vec<TaskId>, StoreError> {
        let unfinished: Vec<TaskId> = self
            .list(&TaskFilter::default())
            .into_iter()
            .filter(|r| !r.is_terminal())
            .map(|r| r.task_id)
            .collect();

        for task_id in &unfinished {
            let error = TaskError::new(
                "worker_lost",
                "the daemon stopped before this task finished",
            );
            self.transition(task_id, TaskEvent::Fail { error }, clock)?;
            tracing::warn!(task_id = %task_id, "failed task left unfinished by previous run");
        }
        Ok(unfinished)
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
