// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay

use depot_core::{HistoryEntry, Operation, Repository, Schedule, ScheduleId, TaskId, TaskRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Materialized state built from WAL operations
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub tasks: HashMap<TaskId, TaskRecord>,
    pub schedules: BTreeMap<ScheduleId, Schedule>,
    pub repositories: BTreeMap<String, Repository>,
    /// Sync and publish history per repository, in completion order
    #[serde(default)]
    pub history: BTreeMap<String, Vec<HistoryEntry>>,
}

impl MaterializedState {
    /// Rebuild state by applying operations in log order
    pub fn from_ops<'a>(ops: impl IntoIterator<Item = &'a Operation>) -> Self {
        let mut state = Self::default();
        for op in ops {
            state.apply(op);
        }
        state
    }

    /// Apply an operation to update the state
    pub fn apply(&mut self, op: &Operation) {
        match op {
            Operation::TaskCreate { record } | Operation::TaskTransition { record } => {
                // A terminal record is never replaced
                if let Some(existing) = self.tasks.get(&record.task_id) {
                    if existing.is_terminal() {
                        return;
                    }
                }
                self.tasks.insert(record.task_id.clone(), record.clone());
            }

            Operation::ScheduleSave { schedule } => {
                self.schedules.insert(schedule.id.clone(), schedule.clone());
            }

            Operation::ScheduleDelete { id } => {
                self.schedules.remove(id);
            }

            Operation::RepositorySave { repository } => {
                self.repositories
                    .insert(repository.id.clone(), repository.clone());
            }

            Operation::RepositoryDelete { id } => {
                self.repositories.remove(id);
                self.history.remove(id);
            }

            Operation::HistoryRecord { entry } => {
                let entries = self.history.entry(entry.repo_id.clone()).or_default();
                match entries.iter_mut().find(|e| e.same_run(entry)) {
                    Some(existing) => *existing = entry.clone(),
                    None => entries.push(entry.clone()),
                }
            }

            Operation::Prune {
                tasks_before,
                history_before,
            } => {
                if let Some(cutoff) = tasks_before {
                    self.tasks.retain(|_, record| {
                        !record.is_terminal()
                            || record.finish_time.map_or(true, |finished| finished >= *cutoff)
                    });
                }
                if let Some(cutoff) = history_before {
                    for entries in self.history.values_mut() {
                        entries.retain(|e| e.completed >= *cutoff);
                    }
                    self.history.retain(|_, entries| !entries.is_empty());
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
