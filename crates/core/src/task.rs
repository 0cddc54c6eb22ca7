// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task record state machine
//!
//! A task record is the durable trace of one dispatched unit of work.
//! It is created WAITING, moves to RUNNING when a worker picks it up, and
//! ends in exactly one terminal state. Terminal records never change again.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Unique identifier for a task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        TaskId(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

/// The lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Recorded, waiting for its reservation or a worker
    Waiting,
    /// Picked up by a worker
    Running,
    Succeeded,
    Failed,
    Canceled,
    /// Never dispatched (validation or reservation failure)
    Rejected,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Waiting | TaskState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
            TaskState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(TaskState::Waiting),
            "running" => Ok(TaskState::Running),
            "succeeded" => Ok(TaskState::Succeeded),
            "failed" => Ok(TaskState::Failed),
            "canceled" => Ok(TaskState::Canceled),
            "rejected" => Ok(TaskState::Rejected),
            _ => Err(format!("unknown task state: {}", s)),
        }
    }
}

/// Structured failure description stored on FAILED and REJECTED records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Stable machine-readable category, e.g. `validation` or `worker_lost`
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<TaskError>>,
}

impl TaskError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: TaskError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Iterate over this error and its nested causes, outermost first
    pub fn chain(&self) -> impl Iterator<Item = &TaskError> {
        std::iter::successors(Some(self), |e| e.cause.as_deref())
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by {})", cause)?;
        }
        Ok(())
    }
}

/// Events that drive a task record between states
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A worker picked the task off its resource queue
    Start,
    /// The work function returned normally
    Succeed { result: Value },
    /// The work function failed, or the worker running it was lost
    Fail { error: TaskError },
    /// Cancellation took effect
    Cancel,
    /// The task could not be dispatched after all
    Reject { error: TaskError },
}

impl TaskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Start => "start",
            TaskEvent::Succeed { .. } => "succeed",
            TaskEvent::Fail { .. } => "fail",
            TaskEvent::Cancel => "cancel",
            TaskEvent::Reject { .. } => "reject",
        }
    }
}

/// Errors from invalid task transitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("task {task_id} already finished as {state}")]
    Terminal { task_id: TaskId, state: TaskState },
    #[error("task {task_id} cannot {event} while {state}")]
    Invalid {
        task_id: TaskId,
        state: TaskState,
        event: &'static str,
    },
}

/// Durable record of a dispatched unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    /// Identifier of the operation the task runs
    pub operation: String,
    /// Reservation key; `None` means unconstrained concurrency
    pub resource_id: Option<String>,
    pub tags: Vec<String>,
    pub state: TaskState,
    pub result: Option<Value>,
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Create a new record in the WAITING state
    pub fn new(
        task_id: impl Into<TaskId>,
        operation: impl Into<String>,
        resource_id: Option<String>,
        tags: Vec<String>,
        clock: &impl Clock,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            operation: operation.into(),
            resource_id: resource_id.filter(|r| !r.is_empty()),
            tags,
            state: TaskState::Waiting,
            result: None,
            error: None,
            created_at: clock.now(),
            start_time: None,
            finish_time: None,
        }
    }

    /// Create a record that is REJECTED from the start
    pub fn rejected(
        task_id: impl Into<TaskId>,
        operation: impl Into<String>,
        resource_id: Option<String>,
        tags: Vec<String>,
        error: TaskError,
        clock: &impl Clock,
    ) -> Self {
        let record = Self::new(task_id, operation, resource_id, tags, clock);
        Self {
            state: TaskState::Rejected,
            error: Some(error),
            finish_time: Some(record.created_at),
            ..record
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Pure transition function returning the updated record
    pub fn transition(
        &self,
        event: TaskEvent,
        clock: &impl Clock,
    ) -> Result<TaskRecord, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal {
                task_id: self.task_id.clone(),
                state: self.state,
            });
        }

        let now = clock.now();
        // finish_time never precedes start_time even if the wall clock steps back
        let finished = Some(self.start_time.map_or(now, |start| start.max(now)));

        match (self.state, event) {
            (TaskState::Waiting, TaskEvent::Start) => Ok(TaskRecord {
                state: TaskState::Running,
                start_time: Some(now),
                ..self.clone()
            }),

            (TaskState::Running, TaskEvent::Succeed { result }) => Ok(TaskRecord {
                state: TaskState::Succeeded,
                result: Some(result),
                finish_time: finished,
                ..self.clone()
            }),

            (TaskState::Waiting | TaskState::Running, TaskEvent::Fail { error }) => {
                Ok(TaskRecord {
                    state: TaskState::Failed,
                    error: Some(error),
                    finish_time: finished,
                    ..self.clone()
                })
            }

            (TaskState::Waiting | TaskState::Running, TaskEvent::Cancel) => Ok(TaskRecord {
                state: TaskState::Canceled,
                finish_time: finished,
                ..self.clone()
            }),

            (TaskState::Waiting, TaskEvent::Reject { error }) => Ok(TaskRecord {
                state: TaskState::Rejected,
                error: Some(error),
                finish_time: finished,
                ..self.clone()
            }),

            (state, event) => Err(TransitionError::Invalid {
                task_id: self.task_id.clone(),
                state,
                event: event.name(),
            }),
        }
    }

    /// Caller-facing snapshot of this record
    pub fn to_result(&self) -> TaskResult {
        TaskResult {
            task_id: self.task_id.clone(),
            state: self.state,
            result: self.result.clone(),
            error: self.error.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Pollable view of a task handed back to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub state: TaskState,
    pub result: Option<Value>,
    pub error: Option<TaskError>,
    pub tags: Vec<String>,
}

impl TaskResult {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
