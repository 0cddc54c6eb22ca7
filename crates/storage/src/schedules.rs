// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable schedule definitions

use crate::error::StoreError;
use crate::journal::Journal;
use chrono::{DateTime, Utc};
use depot_core::{
    Operation, OwnerKey, RunOutcome, Schedule, ScheduleId, ScheduleSpec, ScheduleState,
    ScheduleUpdate,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct ScheduleStore {
    journal: Arc<Journal>,
}

impl ScheduleStore {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self { journal }
    }

    /// Validate and persist a new schedule
    ///
    /// Nothing is written when the interval or threshold is malformed.
    pub fn create(
        &self,
        id: ScheduleId,
        spec: ScheduleSpec,
        now: DateTime<Utc>,
    ) -> Result<Schedule, StoreError> {
        let schedule = Schedule::new(id, spec, now)?;
        self.journal.update(|state| {
            if state.schedules.contains_key(&schedule.id) {
                return Err(StoreError::conflict("schedule", schedule.id.0.clone()));
            }
            Ok((
                Some(Operation::ScheduleSave {
                    schedule: schedule.clone(),
                }),
                (),
            ))
        })?;
        tracing::info!(
            schedule_id = %schedule.id,
            owner = %schedule.owner,
            schedule = %schedule.schedule,
            next_run = ?schedule.next_run,
            "schedule created"
        );
        Ok(schedule)
    }

    pub fn get(&self, id: &ScheduleId) -> Result<Schedule, StoreError> {
        self.journal
            .read(|state| state.schedules.get(id).cloned())
            .ok_or_else(|| StoreError::not_found("schedule", id.0.clone()))
    }

    /// Schedules bound to one owner
    pub fn list(&self, owner: &OwnerKey) -> Vec<Schedule> {
        self.select(|s| &s.owner == owner)
    }

    /// Schedules of every owner on one repository
    pub fn list_for_repo(&self, repo_id: &str) -> Vec<Schedule> {
        self.select(|s| s.owner.repo_id == repo_id)
    }

    pub fn list_all(&self) -> Vec<Schedule> {
        self.select(|_| true)
    }

    /// Schedules the runner should dispatch at `now`
    pub fn list_due(&self, now: DateTime<Utc>) -> Vec<Schedule> {
        self.select(|s| s.is_due(now))
    }

    fn select(&self, keep: impl Fn(&Schedule) -> bool) -> Vec<Schedule> {
        self.journal.read(|state| {
            state
                .schedules
                .values()
                .filter(|s| keep(s))
                .cloned()
                .collect()
        })
    }

    /// Apply a partial update atomically
    pub fn update(
        &self,
        id: &ScheduleId,
        update: ScheduleUpdate,
        now: DateTime<Utc>,
    ) -> Result<Schedule, StoreError> {
        self.journal.update(|state| {
            let current = state
                .schedules
                .get(id)
                .ok_or_else(|| StoreError::not_found("schedule", id.0.clone()))?;
            let next = current.apply_update(update, now)?;
            if current.enabled && !next.enabled && next.failure_threshold.is_some() {
                tracing::info!(schedule_id = %id, "schedule disabled by lowered failure threshold");
            }
            Ok((
                Some(Operation::ScheduleSave {
                    schedule: next.clone(),
                }),
                next,
            ))
        })
    }

    /// Remove a schedule; in-flight tasks it dispatched are unaffected
    pub fn delete(&self, id: &ScheduleId) -> Result<(), StoreError> {
        self.journal.update(|state| {
            if !state.schedules.contains_key(id) {
                return Err(StoreError::not_found("schedule", id.0.clone()));
            }
            Ok((Some(Operation::ScheduleDelete { id: id.clone() }), ()))
        })?;
        tracing::info!(schedule_id = %id, "schedule deleted");
        Ok(())
    }

    /// Delete every schedule on `repo_id`, optionally only those of one plugin
    pub fn delete_owned_by(
        &self,
        repo_id: &str,
        plugin_id: Option<&str>,
    ) -> Result<Vec<ScheduleId>, StoreError> {
        let owned: Vec<ScheduleId> = self
            .list_for_repo(repo_id)
            .into_iter()
            .filter(|s| plugin_id.map_or(true, |p| s.owner.plugin_id == p))
            .map(|s| s.id)
            .collect();
        for id in &owned {
            match self.delete(id) {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(owned)
    }

    /// Claim a due schedule for a run at `now`
    ///
    /// Due-ness is re-checked under the journal lock, so a schedule disabled,
    /// updated or already claimed since it was listed yields `None` and
    /// nothing is written. Fails with NotFound when the schedule was deleted.
    pub fn claim_run(
        &self,
        id: &ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>, StoreError> {
        let claimed = self.journal.update(|state| {
            let current = state
                .schedules
                .get(id)
                .ok_or_else(|| StoreError::not_found("schedule", id.0.clone()))?;
            if !current.is_due(now) {
                return Ok((None, None));
            }
            let next = current.record_run(RunOutcome::Started, now);
            Ok((
                Some(Operation::ScheduleSave {
                    schedule: next.clone(),
                }),
                Some(next),
            ))
        })?;

        match &claimed {
            Some(schedule) if schedule.state() == ScheduleState::Exhausted => {
                tracing::info!(schedule_id = %id, "schedule exhausted its recurrences");
            }
            Some(_) => {}
            None => tracing::debug!(schedule_id = %id, "schedule no longer due, run skipped"),
        }
        Ok(claimed)
    }

    /// Record run bookkeeping in one atomic update
    ///
    /// Fails with NotFound when the schedule was deleted in the meantime.
    pub fn record_run_result(
        &self,
        id: &ScheduleId,
        outcome: RunOutcome,
        run_time: DateTime<Utc>,
    ) -> Result<Schedule, StoreError> {
        let (before, after) = self.journal.update(|state| {
            let current = state
                .schedules
                .get(id)
                .ok_or_else(|| StoreError::not_found("schedule", id.0.clone()))?;
            let next = current.record_run(outcome, run_time);
            Ok((
                Some(Operation::ScheduleSave {
                    schedule: next.clone(),
                }),
                (current.state(), next),
            ))
        })?;

        match (before, after.state()) {
            (ScheduleState::Active, ScheduleState::Exhausted) => {
                tracing::info!(schedule_id = %id, "schedule exhausted its recurrences");
            }
            (ScheduleState::Active, ScheduleState::Disabled) => {
                tracing::warn!(
                    schedule_id = %id,
                    consecutive_failures = after.consecutive_failures,
                    "schedule disabled after reaching its failure threshold"
                );
            }
            _ => {}
        }
        Ok(after)
    }
}

#[cfg(test)]
#[path = "schedules_tests.rs"]
mod tests;
