// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Asynchronous task dispatch
//!
//! `dispatch` persists a WAITING record, takes a place in the resource
//! queue and returns at once. A spawned task then waits for the
//! reservation and a worker permit, runs the handler and persists the
//! terminal state before releasing the reservation.

use crate::error::{DispatchError, ReservationError, WorkError};
use crate::registry::{CallArgs, OperationHandler, OperationRegistry, TaskContext, WorkRequest};
use crate::reservation::{Reservation, ReservationManager};
use depot_core::{
    CancelToken, Clock, IdGen, TaskError, TaskEvent, TaskId, TaskRecord, TaskResult, TaskState,
};
use depot_storage::TaskStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of handlers allowed to run at once
    pub workers: usize,
    /// Longest a task may wait for its reservation; `None` waits forever
    pub reservation_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            reservation_timeout: None,
        }
    }
}

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The task was still waiting and is now CANCELED
    Canceled,
    /// The task is running; its handler was asked to stop
    Requested,
    /// The task had already reached a terminal state
    AlreadyFinished,
}

/// Called once with the terminal record of a dispatched task
pub type CompletionHook = Box<dyn FnOnce(&TaskRecord) + Send + 'static>;

struct Inner<C, I> {
    tasks: TaskStore,
    registry: OperationRegistry,
    reservations: ReservationManager,
    workers: Arc<Semaphore>,
    config: DispatcherConfig,
    clock: C,
    ids: I,
    /// Cancel tokens of tasks that have not finished
    live: Mutex<HashMap<TaskId, CancelToken>>,
    finished: Notify,
}

/// Turns work requests into durable, resource-serialized tasks
pub struct Dispatcher<C: Clock, I: IdGen> {
    inner: Arc<Inner<C, I>>,
}

impl<C: Clock, I: IdGen> Clone for Dispatcher<C, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Clock, I: IdGen> Dispatcher<C, I> {
    pub fn new(
        tasks: TaskStore,
        registry: OperationRegistry,
        reservations: ReservationManager,
        clock: C,
        ids: I,
        config: DispatcherConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            inner: Arc::new(Inner {
                tasks,
                registry,
                reservations,
                workers,
                config,
                clock,
                ids,
                live: Mutex::new(HashMap::new()),
                finished: Notify::new(),
            }),
        }
    }

    /// Persist and start `request`, returning its handle immediately
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, request: WorkRequest) -> Result<TaskResult, DispatchError> {
        self.inner.dispatch(request, None)
    }

    /// Like [`dispatch`](Self::dispatch), running `hook` with the terminal record
    pub fn dispatch_with_hook(
        &self,
        request: WorkRequest,
        hook: CompletionHook,
    ) -> Result<TaskResult, DispatchError> {
        self.inner.dispatch(request, Some(hook))
    }

    /// Persist a REJECTED record for work that could not even be described
    pub fn reject(
        &self,
        operation: &str,
        resource_id: Option<String>,
        tags: Vec<String>,
        error: TaskError,
    ) -> Result<TaskRecord, DispatchError> {
        self.inner.reject(operation, resource_id, tags, error)
    }

    pub fn cancel(&self, task_id: &TaskId) -> Result<CancelOutcome, DispatchError> {
        self.inner.cancel(task_id)
    }

    pub fn get(&self, task_id: &TaskId) -> Result<TaskRecord, DispatchError> {
        Ok(self.inner.tasks.get(task_id)?)
    }

    /// Wait until `task_id` is terminal and its hook has run, at most `timeout`
    ///
    /// Returns the latest record either way.
    pub async fn wait_for(
        &self,
        task_id: &TaskId,
        timeout: Duration,
    ) -> Result<TaskRecord, DispatchError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.finished.notified();
            let record = self.inner.tasks.get(task_id)?;
            if record.is_terminal() && !self.inner.is_live(task_id) {
                return Ok(record);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.inner.tasks.get(task_id)?);
            }
        }
    }

    /// Wait until no task dispatched by this process is unfinished
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.finished.notified();
            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }

    /// Stop granting reservations; queued tasks are rejected
    pub fn shutdown(&self) {
        self.inner.reservations.close();
    }

    /// Tasks dispatched by this process that have not finished
    pub fn in_flight(&self) -> usize {
        self.inner
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.inner.tasks
    }

    pub fn reservations(&self) -> &ReservationManager {
        &self.inner.reservations
    }
}

impl<C: Clock, I: IdGen> Inner<C, I> {
    fn dispatch(
        self: &Arc<Self>,
        request: WorkRequest,
        hook: Option<CompletionHook>,
    ) -> Result<TaskResult, DispatchError> {
        let WorkRequest {
            operation,
            args,
            resource_id,
            tags,
        } = request;

        let Some(handler) = self.registry.get(operation) else {
            let error = TaskError::new(
                "validation",
                format!("no handler registered for {}", operation),
            );
            return self.reject_with_hook(operation.as_str(), resource_id, tags, error, hook);
        };

        if let Err(e) = handler.validate(&args) {
            return self.reject_with_hook(
                operation.as_str(),
                resource_id,
                tags,
                e.to_task_error(),
                hook,
            );
        }

        let reservation = match self.reservations.reserve(resource_id.as_deref()) {
            Ok(reservation) => reservation,
            Err(e) => {
                return self.reject_with_hook(
                    operation.as_str(),
                    resource_id,
                    tags,
                    e.to_task_error(),
                    hook,
                )
            }
        };

        let record = TaskRecord::new(
            self.ids.task_id(),
            operation.as_str(),
            resource_id,
            tags,
            &self.clock,
        );
        // Dropping the reservation on error gives the queue place back
        let record = self.tasks.create(record)?;
        let task_id = record.task_id.clone();

        let cancel = CancelToken::new();
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id.clone(), cancel.clone());

        tracing::info!(
            task_id = %task_id,
            operation = %operation,
            resource_id = record.resource_id.as_deref().unwrap_or(""),
            queued = !reservation.is_granted(),
            "task dispatched"
        );

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let finished = inner
                .execute(task_id.clone(), handler, args, reservation, cancel)
                .await;
            inner.finish(&task_id, finished, hook);
        });

        Ok(record.to_result())
    }

    fn reject(
        &self,
        operation: &str,
        resource_id: Option<String>,
        tags: Vec<String>,
        error: TaskError,
    ) -> Result<TaskRecord, DispatchError> {
        let record = TaskRecord::rejected(
            self.ids.task_id(),
            operation,
            resource_id,
            tags,
            error,
            &self.clock,
        );
        tracing::warn!(
            task_id = %record.task_id,
            operation,
            error = record.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            "task rejected"
        );
        Ok(self.tasks.create(record)?)
    }

    fn reject_with_hook(
        &self,
        operation: &str,
        resource_id: Option<String>,
        tags: Vec<String>,
        error: TaskError,
        hook: Option<CompletionHook>,
    ) -> Result<TaskResult, DispatchError> {
        let record = self.reject(operation, resource_id, tags, error)?;
        if let Some(hook) = hook {
            hook(&record);
        }
        Ok(record.to_result())
    }

    /// Drive one task to a terminal state; `None` if its record vanished
    async fn execute(
        self: &Arc<Self>,
        task_id: TaskId,
        handler: Arc<dyn OperationHandler>,
        args: CallArgs,
        reservation: Reservation,
        cancel: CancelToken,
    ) -> Option<TaskRecord> {
        let acquired = tokio::select! {
            acquired = reservation.acquire(self.config.reservation_timeout) => acquired,
            // cancel() already persisted CANCELED
            _ = cancel.canceled() => return self.tasks.get(&task_id).ok(),
        };
        let guard = match acquired {
            Ok(guard) => guard,
            Err(e) => return self.settle_waiting(&task_id, e),
        };

        let permit = tokio::select! {
            permit = Arc::clone(&self.workers).acquire_owned() => permit,
            _ = cancel.canceled() => return self.tasks.get(&task_id).ok(),
        };
        let Ok(_permit) = permit else {
            return self.settle_waiting(&task_id, ReservationError::Unavailable);
        };

        // Lost a race with cancel(); nothing to run
        let started = match self
            .tasks
            .transition_from(&task_id, TaskState::Waiting, TaskEvent::Start, &self.clock)
        {
            Ok(Some(record)) => record,
            Ok(None) => return self.tasks.get(&task_id).ok(),
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "failed to start task");
                return None;
            }
        };
        tracing::info!(
            task_id = %task_id,
            operation = %started.operation,
            resource_id = started.resource_id.as_deref().unwrap_or(""),
            "task started"
        );

        let start = Instant::now();
        let ctx = TaskContext::new(task_id.clone(), cancel.clone());
        let run = {
            let ctx = ctx.clone();
            tokio::spawn(async move { handler.run(ctx, args).await })
        };
        let outcome = match run.await {
            Ok(outcome) => outcome,
            Err(e) => Err(WorkError::Panicked(e.to_string())),
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let event = match outcome {
            Ok(result) => TaskEvent::Succeed {
                result: self.dispatch_followups(&ctx, result),
            },
            Err(e) if e.is_canceled() => TaskEvent::Cancel,
            Err(e) => TaskEvent::Fail {
                error: e.to_task_error(),
            },
        };

        let finished = match self.tasks.transition(&task_id, event, &self.clock) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "failed to record task outcome");
                self.tasks.get(&task_id).ok()
            }
        };
        if let Some(record) = &finished {
            match record.state {
                TaskState::Failed => tracing::warn!(
                    task_id = %task_id,
                    elapsed_ms,
                    error = record.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                    "task failed"
                ),
                state => tracing::info!(task_id = %task_id, elapsed_ms, %state, "task finished"),
            }
        }

        // Terminal state is durable before the next waiter can start
        drop(guard);
        finished
    }

    /// Reject a task that never got its reservation
    fn settle_waiting(&self, task_id: &TaskId, err: ReservationError) -> Option<TaskRecord> {
        let event = TaskEvent::Reject {
            error: err.to_task_error(),
        };
        match self
            .tasks
            .transition_from(task_id, TaskState::Waiting, event, &self.clock)
        {
            Ok(Some(record)) => {
                tracing::warn!(task_id = %task_id, error = %err, "task rejected");
                Some(record)
            }
            Ok(None) => self.tasks.get(task_id).ok(),
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "failed to reject task");
                None
            }
        }
    }

    /// Dispatch work queued by a successful handler
    ///
    /// The spawned task ids are added to an object result under
    /// `spawned_tasks`.
    fn dispatch_followups(self: &Arc<Self>, ctx: &TaskContext, result: Value) -> Value {
        let followups = ctx.take_followups();
        if followups.is_empty() {
            return result;
        }

        let mut spawned = Vec::new();
        for request in followups {
            match self.dispatch(request, None) {
                Ok(task) => spawned.push(Value::String(task.task_id.0)),
                Err(e) => {
                    tracing::error!(task_id = %ctx.task_id, error = %e, "follow-up dispatch failed")
                }
            }
        }
        match result {
            Value::Object(mut map) => {
                map.insert("spawned_tasks".to_string(), Value::Array(spawned));
                Value::Object(map)
            }
            other => other,
        }
    }

    /// Run the hook, then stop tracking the task
    fn finish(&self, task_id: &TaskId, record: Option<TaskRecord>, hook: Option<CompletionHook>) {
        if let (Some(record), Some(hook)) = (record, hook) {
            if record.is_terminal() {
                hook(&record);
            }
        }
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id);
        self.finished.notify_waiters();
    }

    fn is_live(&self, task_id: &TaskId) -> bool {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(task_id)
    }

    fn cancel(&self, task_id: &TaskId) -> Result<CancelOutcome, DispatchError> {
        let record = self.tasks.get(task_id)?;
        if record.is_terminal() {
            return Ok(CancelOutcome::AlreadyFinished);
        }

        let token = self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
            .cloned();

        if record.state == TaskState::Waiting
            && self
                .tasks
                .transition_from(task_id, TaskState::Waiting, TaskEvent::Cancel, &self.clock)?
                .is_some()
        {
            if let Some(token) = &token {
                token.cancel();
            }
            tracing::info!(task_id = %task_id, "waiting task canceled");
            return Ok(CancelOutcome::Canceled);
        }

        if self.tasks.get(task_id)?.is_terminal() {
            return Ok(CancelOutcome::AlreadyFinished);
        }
        if let Some(token) = &token {
            token.cancel();
        }
        tracing::info!(task_id = %task_id, "cancellation requested");
        Ok(CancelOutcome::Requested)
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
