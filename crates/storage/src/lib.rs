// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! depot-storage: WAL-backed stores for tasks, schedules, repositories
//! and sync/publish history, with snapshot checkpoints

mod error;
mod history;
mod journal;
mod repositories;
mod schedules;
mod snapshot;
mod state;
mod tasks;
mod wal;

pub use error::StoreError;
pub use history::HistoryStore;
pub use journal::{Journal, JournalConfig, PruneReport};
pub use repositories::RepositoryStore;
pub use schedules::ScheduleStore;
pub use snapshot::{Snapshot, SnapshotError};
pub use state::MaterializedState;
pub use tasks::{TaskFilter, TaskStore};
pub use wal::{Wal, WalError};
