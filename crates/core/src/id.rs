// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ID generation abstractions
//!
//! Task ids are hyphenated UUIDs; schedule ids are the 32-character simple
//! form so they read like document ids in URLs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Generates unique identifiers for tasks and schedules
pub trait IdGen: Clone + Send + Sync + 'static {
    fn task_id(&self) -> String;
    fn schedule_id(&self) -> String;
}

/// UUID-based ID generator for production use
#[derive(Clone, Default)]
pub struct UuidIdGen;

impl IdGen for UuidIdGen {
    fn task_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn schedule_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Sequential ID generator for testing
///
/// Both kinds of id draw from one shared counter, so every id handed out by
/// clones of the same generator is distinct.
#[derive(Clone)]
pub struct SequentialIdGen {
    counter: Arc<AtomicU64>,
}

impl SequentialIdGen {
    pub fn new() -> Self {
        Self {
            counter: Arc::new(AtomicU64::new(1)),
        }
    }

    fn bump(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for SequentialIdGen {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGen for SequentialIdGen {
    fn task_id(&self) -> String {
        format!("task-{}", self.bump())
    }

    fn schedule_id(&self) -> String {
        format!("schedule-{}", self.bump())
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
