// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Repository catalog records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("invalid repository id {0:?}: only letters, numbers, underscores, periods and hyphens are allowed")]
    InvalidId(String),
}

/// Repository ids are non-empty and limited to `[A-Za-z0-9_.-]`
pub fn validate_repo_id(id: &str) -> Result<(), RepositoryError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(RepositoryError::InvalidId(id.to_string()))
    }
}

/// An importer or distributor attached to a repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub id: String,
    pub type_id: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Distributors only: publish after every successful sync
    #[serde(default)]
    pub auto_publish: bool,
}

impl PluginConfig {
    pub fn new(id: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_id: type_id.into(),
            config: Map::new(),
            auto_publish: false,
        }
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    pub fn auto_publish(mut self, auto_publish: bool) -> Self {
        self.auto_publish = auto_publish;
        self
    }

    /// Lay `delta` over the stored config; `null` values remove keys
    pub fn merge_config(&mut self, delta: &Map<String, Value>) {
        merge_removing_nulls(&mut self.config, delta);
    }
}

fn merge_removing_nulls(target: &mut Map<String, Value>, delta: &Map<String, Value>) {
    for (key, value) in delta {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// A content repository in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Map<String, Value>,
    #[serde(default)]
    pub importer: Option<PluginConfig>,
    #[serde(default)]
    pub distributors: BTreeMap<String, PluginConfig>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_publish: Option<DateTime<Utc>>,
}

impl Repository {
    /// New empty repository; the display name defaults to the id
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            description: None,
            notes: Map::new(),
            importer: None,
            distributors: BTreeMap::new(),
            last_sync: None,
            last_publish: None,
        }
    }

    pub fn distributor(&self, distributor_id: &str) -> Option<&PluginConfig> {
        self.distributors.get(distributor_id)
    }

    /// Distributors flagged to publish after each sync
    pub fn auto_publish_distributors(&self) -> impl Iterator<Item = &PluginConfig> {
        self.distributors.values().filter(|d| d.auto_publish)
    }

    pub fn apply_delta(&mut self, delta: &RepositoryDelta) {
        if let Some(name) = &delta.display_name {
            self.display_name = name.clone();
        }
        if let Some(description) = &delta.description {
            self.description = Some(description.clone());
        }
        if let Some(notes) = &delta.notes {
            merge_removing_nulls(&mut self.notes, notes);
        }
    }
}

/// Partial update of a repository's descriptive fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryDelta {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Keys mapped to `null` are removed
    #[serde(default)]
    pub notes: Option<Map<String, Value>>,
}
