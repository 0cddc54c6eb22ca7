// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared WAL plus materialized state
//!
//! Every mutation runs under one lock: the closure reads the current state,
//! decides on an operation, and the operation is appended and applied
//! before the lock is released. Read-modify-write cycles on a record can
//! therefore never lose an update.
//!
//! A checkpoint writes a snapshot of the state and truncates the WAL. On
//! open the snapshot is loaded and only WAL entries numbered after it are
//! replayed, so a crash between the two steps loses nothing.

use crate::error::StoreError;
use crate::snapshot::Snapshot;
use crate::state::MaterializedState;
use crate::wal::Wal;
use chrono::{DateTime, Utc};
use depot_core::Operation;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Journal tuning
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Checkpoint after this many appended entries; 0 disables
    pub checkpoint_every: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: 1000,
        }
    }
}

/// Records dropped by [`Journal::prune`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub tasks: usize,
    pub history: usize,
}

struct Durable {
    wal: Wal,
    snapshot_path: PathBuf,
    /// Entries appended since the last checkpoint
    pending: u64,
}

struct Inner {
    /// `None` keeps everything in memory
    durable: Option<Durable>,
    state: MaterializedState,
}

pub struct Journal {
    inner: Mutex<Inner>,
    config: JournalConfig,
}

impl Journal {
    /// Open the WAL at `path` and rebuild state from it
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with(path, JournalConfig::default())
    }

    /// Open with explicit tuning
    ///
    /// The snapshot next to the WAL, if any, is verified and loaded first.
    pub fn open_with(path: &Path, config: JournalConfig) -> Result<Self, StoreError> {
        let snapshot_path = Snapshot::path_for(path);
        let (mut state, base) = match Snapshot::load(&snapshot_path)? {
            Some(snapshot) => (snapshot.state, snapshot.sequence),
            None => (MaterializedState::default(), 0),
        };

        let ops = Wal::replay_after(path, base)?;
        for op in &ops {
            state.apply(op);
        }
        let mut wal = Wal::open(path)?;
        wal.resume_from(base);

        tracing::info!(
            path = %path.display(),
            snapshot_sequence = base,
            replayed = ops.len(),
            tasks = state.tasks.len(),
            schedules = state.schedules.len(),
            repositories = state.repositories.len(),
            "replayed journal"
        );
        Ok(Self {
            inner: Mutex::new(Inner {
                durable: Some(Durable {
                    wal,
                    snapshot_path,
                    pending: ops.len() as u64,
                }),
                state,
            }),
            config,
        })
    }

    /// Journal with no backing file
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                durable: None,
                state: MaterializedState::default(),
            }),
            config: JournalConfig::default(),
        }
    }

    /// Run `f` against a consistent view of the state
    pub fn read<R>(&self, f: impl FnOnce(&MaterializedState) -> R) -> R {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&inner.state)
    }

    /// Append and apply a single operation
    pub fn commit(&self, op: Operation) -> Result<(), StoreError> {
        self.update(|_| Ok((Some(op), ())))
    }

    /// Atomic read-modify-write
    ///
    /// `f` returns the operation to persist (or `None` to leave state as is)
    /// together with the value handed back to the caller.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&MaterializedState) -> Result<(Option<Operation>, T), StoreError>,
    ) -> Result<T, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (op, value) = f(&inner.state)?;
        if let Some(op) = op {
            if let Some(durable) = inner.durable.as_mut() {
                durable.wal.append(&op)?;
                durable.pending += 1;
            }
            inner.state.apply(&op);
            self.maybe_checkpoint(&mut inner);
        }
        Ok(value)
    }

    /// Snapshot the state and truncate the WAL, returning the covered sequence
    ///
    /// Skipped when nothing was appended since the last snapshot. In-memory
    /// journals have nothing to write and return 0.
    pub fn checkpoint(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        checkpoint_locked(&mut inner)
    }

    /// Drop terminal tasks finished before `tasks_before` and history
    /// completed before `history_before`
    ///
    /// Pruning is itself a WAL entry, so it replays the same way after a
    /// restart. Nothing is written when nothing matches.
    pub fn prune(
        &self,
        tasks_before: Option<DateTime<Utc>>,
        history_before: Option<DateTime<Utc>>,
    ) -> Result<PruneReport, StoreError> {
        self.update(|state| {
            let tasks = tasks_before.map_or(0, |cutoff| {
                state
                    .tasks
                    .values()
                    .filter(|r| r.is_terminal() && r.finish_time.is_some_and(|f| f < cutoff))
                    .count()
            });
            let history = history_before.map_or(0, |cutoff| {
                state
                    .history
                    .values()
                    .flatten()
                    .filter(|e| e.completed < cutoff)
                    .count()
            });
            let report = PruneReport { tasks, history };
            if report == PruneReport::default() {
                return Ok((None, report));
            }
            Ok((
                Some(Operation::Prune {
                    tasks_before,
                    history_before,
                }),
                report,
            ))
        })
    }

    fn maybe_checkpoint(&self, inner: &mut Inner) {
        let due = inner.durable.as_ref().is_some_and(|d| {
            self.config.checkpoint_every > 0 && d.pending >= self.config.checkpoint_every
        });
        if !due {
            return;
        }
        // The entry that triggered this is already durable in the WAL
        if let Err(e) = checkpoint_locked(inner) {
            tracing::warn!(error = %e, "automatic checkpoint failed, WAL kept");
        }
    }
}

fn checkpoint_locked(inner: &mut Inner) -> Result<u64, StoreError> {
    let Some(durable) = inner.durable.as_mut() else {
        return Ok(0);
    };
    let sequence = durable.wal.sequence();
    if durable.pending == 0 && durable.snapshot_path.exists() {
        return Ok(sequence);
    }
    Snapshot::write(&durable.snapshot_path, &inner.state, sequence, Utc::now())?;
    durable.wal.truncate()?;
    let dropped = std::mem::take(&mut durable.pending);
    tracing::info!(sequence, entries = dropped, "journal checkpointed");
    Ok(sequence)
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
