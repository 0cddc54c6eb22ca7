// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! depot-core: data model for the depot repository control plane
//!
//! This crate provides:
//! - Pure state machines for task records and recurring schedules
//! - The ISO-8601 recurring interval parser
//! - Repository catalog records, sync/publish history and task tags
//! - WAL operations, clock and id abstractions
//!
//! Nothing here performs I/O.

pub mod cancel;
pub mod clock;
pub mod history;
pub mod id;
pub mod iso;
pub mod operation;
pub mod repository;
pub mod schedule;
pub mod tags;
pub mod task;

pub use cancel::CancelToken;
pub use clock::{Clock, FakeClock, SystemClock};
pub use history::{HistoryEntry, HistoryKind, HistoryResult};
pub use id::{IdGen, SequentialIdGen, UuidIdGen};
pub use iso::{IsoDuration, IsoError, IsoSchedule};
pub use operation::Operation;
pub use repository::{
    validate_repo_id, PluginConfig, Repository, RepositoryDelta, RepositoryError,
};
pub use schedule::{
    CallSpec, OwnerKey, RunOutcome, Schedule, ScheduleError, ScheduleId, ScheduleSpec,
    ScheduleState, ScheduleUpdate, ScheduledAction, OVERRIDE_CONFIG_KEY,
};
pub use task::{
    TaskError, TaskEvent, TaskId, TaskRecord, TaskResult, TaskState, TransitionError,
};
