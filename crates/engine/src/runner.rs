// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic dispatch of due schedules
//!
//! Each tick claims every listed schedule by recording a start (which moves
//! `next_run` forward) before dispatching its call. The claim re-checks
//! due-ness atomically, so a schedule changed after listing is skipped. The outcome is
//! recorded by a completion hook once the task is terminal.

use crate::dispatcher::{CompletionHook, Dispatcher};
use crate::error::DispatchError;
use crate::registry::{CallArgs, OperationId, WorkRequest};
use chrono::{DateTime, Utc};
use depot_core::{
    tags, CancelToken, Clock, IdGen, RunOutcome, Schedule, ScheduleId, TaskError, TaskResult,
    TaskState,
};
use depot_storage::ScheduleStore;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Schedule runner tuning
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How often due schedules are looked for
    pub tick: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
        }
    }
}

pub struct ScheduleRunner<C: Clock, I: IdGen> {
    schedules: ScheduleStore,
    dispatcher: Dispatcher<C, I>,
    clock: C,
    config: RunnerConfig,
}

impl<C: Clock, I: IdGen> ScheduleRunner<C, I> {
    pub fn new(
        schedules: ScheduleStore,
        dispatcher: Dispatcher<C, I>,
        clock: C,
        config: RunnerConfig,
    ) -> Self {
        Self {
            schedules,
            dispatcher,
            clock,
            config,
        }
    }

    /// Dispatch every schedule due now, returning the new task handles
    ///
    /// Must be called from within a tokio runtime.
    pub fn run_once(&self) -> Vec<TaskResult> {
        let now = self.clock.now();
        let mut dispatched = Vec::new();
        for schedule in self.schedules.list_due(now) {
            match self.run_schedule(&schedule, now) {
                Ok(Some(task)) => dispatched.push(task),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(schedule_id = %schedule.id, error = %e, "failed to dispatch schedule");
                }
            }
        }
        dispatched
    }

    /// Run ticks until `shutdown` is canceled
    pub fn spawn(self, shutdown: CancelToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(tick = ?self.config.tick, "schedule runner started");
            loop {
                tokio::select! {
                    _ = shutdown.canceled() => break,
                    _ = ticker.tick() => {
                        let dispatched = self.run_once();
                        if !dispatched.is_empty() {
                            tracing::debug!(count = dispatched.len(), "dispatched scheduled calls");
                        }
                    }
                }
            }
            tracing::info!("schedule runner stopped");
        })
    }

    fn run_schedule(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskResult>, DispatchError> {
        let schedule = match self.schedules.claim_run(&schedule.id, now) {
            Ok(Some(claimed)) => claimed,
            // Disabled, updated or claimed since it was listed
            Ok(None) => return Ok(None),
            // Deleted since it was listed
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let call = schedule.call_for_run();
        let schedule_tag = tags::schedule_tag(&schedule.id.0);

        let operation = match call.operation.parse::<OperationId>() {
            Ok(operation) => operation,
            Err(message) => {
                let record = self.dispatcher.reject(
                    &call.operation,
                    None,
                    vec![schedule_tag],
                    TaskError::new("validation", message),
                )?;
                tracing::warn!(
                    schedule_id = %schedule.id,
                    operation = %call.operation,
                    "scheduled call names an unknown operation"
                );
                record_outcome(&self.schedules, &schedule.id, RunOutcome::Rejected, now);
                return Ok(Some(record.to_result()));
            }
        };

        let request = WorkRequest::new(operation, CallArgs::from(call)).with_tag(schedule_tag);
        let hook: CompletionHook = {
            let schedules = self.schedules.clone();
            let clock = self.clock.clone();
            let id = schedule.id.clone();
            Box::new(move |record| {
                let outcome = match record.state {
                    TaskState::Succeeded => RunOutcome::Succeeded,
                    TaskState::Canceled => RunOutcome::Canceled,
                    TaskState::Rejected => RunOutcome::Rejected,
                    _ => RunOutcome::Failed,
                };
                record_outcome(&schedules, &id, outcome, clock.now());
            })
        };

        let task = self.dispatcher.dispatch_with_hook(request, hook)?;
        tracing::info!(
            schedule_id = %schedule.id,
            task_id = %task.task_id,
            operation = %operation,
            "dispatched scheduled call"
        );
        Ok(Some(task))
    }
}

fn record_outcome(
    schedules: &ScheduleStore,
    id: &ScheduleId,
    outcome: RunOutcome,
    at: DateTime<Utc>,
) {
    match schedules.record_run_result(id, outcome, at) {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {
            tracing::debug!(schedule_id = %id, ?outcome, "schedule deleted before its run finished");
        }
        Err(e) => {
            tracing::error!(schedule_id = %id, ?outcome, error = %e, "failed to record schedule run");
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
