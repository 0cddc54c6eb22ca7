// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sync and publish history

use crate::error::StoreError;
use crate::journal::Journal;
use depot_core::{HistoryEntry, HistoryKind, Operation};
use std::sync::Arc;

#[derive(Clone)]
pub struct HistoryStore {
    journal: Arc<Journal>,
}

impl HistoryStore {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self { journal }
    }

    /// Append an entry to its repository's history
    ///
    /// Returns false without writing when the repository no longer exists.
    pub fn record(&self, entry: HistoryEntry) -> Result<bool, StoreError> {
        self.journal.update(|state| {
            if !state.repositories.contains_key(&entry.repo_id) {
                return Ok((None, false));
            }
            Ok((Some(Operation::HistoryRecord { entry }), true))
        })
    }

    /// Entries of one kind on a repository, newest start first
    ///
    /// `plugin_id` narrows to one importer or distributor; `limit` caps the
    /// number returned.
    pub fn list(
        &self,
        repo_id: &str,
        kind: HistoryKind,
        plugin_id: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self.journal.read(|state| {
            state
                .history
                .get(repo_id)
                .into_iter()
                .flatten()
                .filter(|e| e.kind == kind && plugin_id.map_or(true, |p| e.plugin_id == p))
                .cloned()
                .collect()
        });
        entries.sort_by(|a, b| b.started.cmp(&a.started));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        entries
    }
}

#[cfg(test)]
#[path = "history_tests.rs"]
mod tests;
