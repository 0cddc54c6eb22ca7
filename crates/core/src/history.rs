// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sync and publish history
//!
//! One entry per plugin invocation, written when the plugin call returns.
//! Entries belong to their repository and disappear with it.

use crate::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which plugin action an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Sync,
    Publish,
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryKind::Sync => f.write_str("sync"),
            HistoryKind::Publish => f.write_str("publish"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryResult {
    Success,
    Failed,
    Canceled,
}

/// Record of one finished sync or publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub task_id: TaskId,
    pub repo_id: String,
    pub kind: HistoryKind,
    /// Importer or distributor id on the repository
    pub plugin_id: String,
    pub plugin_type_id: String,
    pub started: DateTime<Utc>,
    pub completed: DateTime<Utc>,
    pub result: HistoryResult,
    /// Plugin report on success
    #[serde(default)]
    pub summary: Value,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl HistoryEntry {
    pub fn succeeded(mut self, summary: Value) -> Self {
        self.result = HistoryResult::Success;
        self.summary = summary;
        self.error_message = None;
        self
    }

    pub fn failed(mut self, result: HistoryResult, message: impl Into<String>) -> Self {
        self.result = result;
        self.summary = Value::Null;
        self.error_message = Some(message.into());
        self
    }

    /// Same plugin invocation, so replaying its record is a no-op
    pub fn same_run(&self, other: &HistoryEntry) -> bool {
        self.task_id == other.task_id && self.kind == other.kind && self.plugin_id == other.plugin_id
    }
}
