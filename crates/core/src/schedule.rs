// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recurring schedule state machine
//!
//! A schedule binds one repository operation (a sync or a publish) to an
//! ISO-8601 recurring interval. It is ACTIVE while enabled and not
//! exhausted, DISABLED when switched off (explicitly or by hitting its
//! failure threshold), and EXHAUSTED once `remaining_runs` reaches zero.
//!
//! `next_run` is always derived, never set directly: it is the earliest
//! occurrence after `last_run` that is not in the past, or `None` when the
//! schedule is not active.

use crate::iso::{IsoError, IsoSchedule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Key under which a schedule's override configuration reaches the handler
pub const OVERRIDE_CONFIG_KEY: &str = "override_config";

/// Unique identifier for a schedule
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(pub String);

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ScheduleId {
    fn from(s: String) -> Self {
        ScheduleId(s)
    }
}

impl From<&str> for ScheduleId {
    fn from(s: &str) -> Self {
        ScheduleId(s.to_string())
    }
}

/// Which plugin operation a schedule triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledAction {
    /// Importer sync
    Sync,
    /// Distributor publish
    Publish,
}

impl fmt::Display for ScheduledAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduledAction::Sync => f.write_str("sync"),
            ScheduledAction::Publish => f.write_str("publish"),
        }
    }
}

/// The resource and operation a schedule belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerKey {
    pub repo_id: String,
    /// Importer id for syncs, distributor id for publishes
    pub plugin_id: String,
    pub action: ScheduledAction,
}

impl OwnerKey {
    pub fn sync(repo_id: impl Into<String>, importer_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            plugin_id: importer_id.into(),
            action: ScheduledAction::Sync,
        }
    }

    pub fn publish(repo_id: impl Into<String>, distributor_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            plugin_id: distributor_id.into(),
            action: ScheduledAction::Publish,
        }
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.repo_id, self.plugin_id, self.action)
    }
}

/// The call a schedule dispatches on every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSpec {
    pub operation: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl CallSpec {
    pub fn new(operation: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            operation: operation.into(),
            args,
            kwargs: Map::new(),
        }
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    /// Copy of this call with `overrides` laid over its override configuration
    ///
    /// Keys already present under [`OVERRIDE_CONFIG_KEY`] are replaced by the
    /// schedule's values; other keys are kept.
    pub fn with_overrides(&self, overrides: &Map<String, Value>) -> CallSpec {
        let mut call = self.clone();
        let mut merged = match call.kwargs.remove(OVERRIDE_CONFIG_KEY) {
            Some(Value::Object(existing)) => existing,
            _ => Map::new(),
        };
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
        call.kwargs
            .insert(OVERRIDE_CONFIG_KEY.to_string(), Value::Object(merged));
        call
    }
}

/// Errors from creating or updating schedules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Iso(#[from] IsoError),
    #[error("failure_threshold must be a positive integer, got {0}")]
    InvalidFailureThreshold(u32),
}

/// Operator-visible lifecycle of a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleState {
    Active,
    Disabled,
    Exhausted,
}

/// Bookkeeping events reported for a schedule run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// The run was dispatched
    Started,
    Succeeded,
    Failed,
    Canceled,
    /// The dispatch was refused before the call ran
    Rejected,
}

/// Input for creating a schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub owner: OwnerKey,
    pub call: CallSpec,
    pub schedule: String,
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub override_config: Option<Map<String, Value>>,
}

impl ScheduleSpec {
    pub fn new(owner: OwnerKey, call: CallSpec, schedule: impl Into<String>) -> Self {
        Self {
            owner,
            call,
            schedule: schedule.into(),
            failure_threshold: None,
            enabled: None,
            override_config: None,
        }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn override_config(mut self, config: Map<String, Value>) -> Self {
        self.override_config = Some(config);
        self
    }
}

/// Partial update of a schedule's user-editable fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    /// `Some(None)` clears the threshold
    #[serde(default, deserialize_with = "present")]
    pub failure_threshold: Option<Option<u32>>,
    #[serde(default)]
    pub override_config: Option<Map<String, Value>>,
}

/// Distinguish an explicit `null` from an absent field
fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl ScheduleUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ScheduleUpdate::default()
    }
}

/// A persisted recurring trigger bound to one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(rename = "_id")]
    pub id: ScheduleId,
    pub owner: OwnerKey,
    pub call: CallSpec,
    pub schedule: IsoSchedule,
    pub failure_threshold: Option<u32>,
    pub enabled: bool,
    pub consecutive_failures: u32,
    pub remaining_runs: Option<u32>,
    /// Anchor for occurrence enumeration
    pub first_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub override_config: Map<String, Value>,
}

fn check_threshold(threshold: Option<u32>) -> Result<(), ScheduleError> {
    match threshold {
        Some(0) => Err(ScheduleError::InvalidFailureThreshold(0)),
        _ => Ok(()),
    }
}

impl Schedule {
    /// Build a schedule from its creation input
    ///
    /// Fails synchronously on a malformed interval or threshold so no
    /// record is ever created for it.
    pub fn new(
        id: impl Into<ScheduleId>,
        spec: ScheduleSpec,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        let iso = IsoSchedule::parse(&spec.schedule)?;
        check_threshold(spec.failure_threshold)?;

        let mut schedule = Schedule {
            id: id.into(),
            owner: spec.owner,
            call: spec.call,
            first_run: iso.start().unwrap_or(now),
            remaining_runs: iso.recurrences(),
            schedule: iso,
            failure_threshold: spec.failure_threshold,
            enabled: spec.enabled.unwrap_or(true),
            consecutive_failures: 0,
            last_run: None,
            next_run: None,
            override_config: spec.override_config.unwrap_or_default(),
        };
        schedule.next_run = schedule.compute_next_run(now);
        Ok(schedule)
    }

    pub fn state(&self) -> ScheduleState {
        if self.remaining_runs == Some(0) {
            ScheduleState::Exhausted
        } else if !self.enabled {
            ScheduleState::Disabled
        } else {
            ScheduleState::Active
        }
    }

    /// Whether the runner should dispatch this schedule at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state() == ScheduleState::Active && self.next_run.is_some_and(|t| t <= now)
    }

    /// Earliest occurrence after `last_run` that is not before `now`
    pub fn compute_next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.state() != ScheduleState::Active {
            return None;
        }
        match self.last_run {
            Some(last) if last >= now => self.schedule.first_after(self.first_run, last),
            _ => self.schedule.first_at_or_after(self.first_run, now),
        }
    }

    /// The call to dispatch for one run, with overrides applied
    pub fn call_for_run(&self) -> CallSpec {
        self.call.with_overrides(&self.override_config)
    }

    /// Apply an explicit update, returning the new schedule
    pub fn apply_update(
        &self,
        update: ScheduleUpdate,
        now: DateTime<Utc>,
    ) -> Result<Schedule, ScheduleError> {
        let mut next = self.clone();
        let mut recompute = false;

        if let Some(raw) = update.schedule {
            let iso = IsoSchedule::parse(&raw)?;
            // Without an explicit start the new period counts from the last run
            next.first_run = iso.start().or(self.last_run).unwrap_or(now);
            next.remaining_runs = iso.recurrences();
            next.schedule = iso;
            recompute = true;
        }

        if let Some(threshold) = update.failure_threshold {
            check_threshold(threshold)?;
            next.failure_threshold = threshold;
        }

        if let Some(config) = update.override_config {
            next.override_config = config;
        }

        if let Some(enabled) = update.enabled {
            if enabled && !self.enabled {
                next.consecutive_failures = 0;
            }
            if enabled != self.enabled {
                recompute = true;
            }
            next.enabled = enabled;
        }

        if next.enabled && next.threshold_reached() {
            next.enabled = false;
            recompute = true;
        }

        if recompute {
            next.next_run = next.compute_next_run(now);
        }
        Ok(next)
    }

    /// Record run bookkeeping, returning the new schedule
    pub fn record_run(&self, outcome: RunOutcome, run_time: DateTime<Utc>) -> Schedule {
        let mut next = self.clone();
        match outcome {
            RunOutcome::Started => {
                next.last_run = Some(run_time);
                next.remaining_runs = self.remaining_runs.map(|n| n.saturating_sub(1));
                next.next_run = next.compute_next_run(run_time);
            }
            RunOutcome::Succeeded => {
                next.consecutive_failures = 0;
            }
            RunOutcome::Failed | RunOutcome::Rejected => {
                next.consecutive_failures = self.consecutive_failures.saturating_add(1);
                // An exhausted schedule stays exhausted, never also disabled
                if self.state() == ScheduleState::Active && next.threshold_reached() {
                    next.enabled = false;
                    next.next_run = None;
                }
            }
            RunOutcome::Canceled => {}
        }
        next
    }

    fn threshold_reached(&self) -> bool {
        self.failure_threshold
            .is_some_and(|threshold| self.consecutive_failures >= threshold)
    }
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
