// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! depot-engine: task dispatch and scheduling
//!
//! Work is persisted as a task record, serialized per resource through a
//! FIFO reservation queue and executed on a bounded worker pool. The
//! schedule runner feeds due schedules into the same dispatcher, and a
//! maintenance loop keeps the journal pruned and checkpointed.

mod criteria;
mod dispatcher;
mod error;
mod handlers;
mod maintenance;
mod registry;
mod reservation;
mod runner;
mod service;

pub use criteria::{RepoCriteria, UnitCriteria};
pub use dispatcher::{CancelOutcome, CompletionHook, Dispatcher, DispatcherConfig};
pub use error::{DispatchError, ReservationError, ServiceError, WorkError};
pub use handlers::RepositoryOps;
pub use maintenance::{JournalMaintenance, MaintenanceConfig, MaintenanceReport};
pub use registry::{
    CallArgs, OperationHandler, OperationId, OperationRegistry, TaskContext, WorkRequest,
};
pub use reservation::{Reservation, ReservationGuard, ReservationManager};
pub use runner::{RunnerConfig, ScheduleRunner};
pub use service::{CallOutcome, RepoCommand, RepositoryService, ScheduleRequest};
