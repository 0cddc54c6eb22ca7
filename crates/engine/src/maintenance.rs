// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic journal maintenance
//!
//! Each tick prunes terminal tasks and history past their retention, then
//! checkpoints the journal so the WAL does not grow without bound.

use chrono::{DateTime, Utc};
use depot_core::{CancelToken, Clock};
use depot_storage::{Journal, PruneReport, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Configuration for journal maintenance
#[derive(Clone, Debug)]
pub struct MaintenanceConfig {
    /// How often to run maintenance
    pub interval: Duration,
    /// How long finished tasks stay queryable; `None` keeps them forever
    pub task_retention: Option<Duration>,
    /// How long sync and publish history is kept; `None` keeps it forever
    pub history_retention: Option<Duration>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            task_retention: Some(Duration::from_secs(7 * 24 * 3600)),
            history_retention: Some(Duration::from_secs(30 * 24 * 3600)),
        }
    }
}

impl MaintenanceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_task_retention(mut self, retention: Option<Duration>) -> Self {
        self.task_retention = retention;
        self
    }

    pub fn with_history_retention(mut self, retention: Option<Duration>) -> Self {
        self.history_retention = retention;
        self
    }
}

/// Outcome of one maintenance cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub pruned: PruneReport,
    /// WAL sequence covered by the snapshot after this cycle
    pub sequence: u64,
}

pub struct JournalMaintenance<C: Clock> {
    journal: Arc<Journal>,
    clock: C,
    config: MaintenanceConfig,
}

impl<C: Clock> JournalMaintenance<C> {
    pub fn new(journal: Arc<Journal>, clock: C, config: MaintenanceConfig) -> Self {
        Self {
            journal,
            clock,
            config,
        }
    }

    /// Run a single maintenance cycle
    pub fn tick(&self) -> Result<MaintenanceReport, StoreError> {
        let now = self.clock.now();
        let pruned = self.journal.prune(
            cutoff(now, self.config.task_retention),
            cutoff(now, self.config.history_retention),
        )?;
        if pruned != PruneReport::default() {
            tracing::info!(
                tasks = pruned.tasks,
                history = pruned.history,
                "pruned records past retention"
            );
        }
        let sequence = self.journal.checkpoint()?;
        Ok(MaintenanceReport { pruned, sequence })
    }

    /// Run cycles until `shutdown` is canceled; the first runs immediately
    pub fn spawn(self, shutdown: CancelToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval = ?self.config.interval, "journal maintenance started");
            loop {
                tokio::select! {
                    _ = shutdown.canceled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick() {
                            tracing::error!(error = %e, "journal maintenance failed");
                        }
                    }
                }
            }
            tracing::info!("journal maintenance stopped");
        })
    }
}

fn cutoff(now: DateTime<Utc>, retention: Option<Duration>) -> Option<DateTime<Utc>> {
    let retention = chrono::Duration::from_std(retention?).ok()?;
    now.checked_sub_signed(retention)
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
