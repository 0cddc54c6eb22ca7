// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use depot_core::CancelToken;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from plugin calls
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("plugin call failed: {0}")]
    Failed(String),
    #[error("plugin call canceled")]
    Canceled,
    #[error("{plugin} does not support {operation}")]
    Unsupported {
        plugin: String,
        operation: &'static str,
    },
}

impl PluginError {
    /// Stable category recorded on failed tasks
    pub fn kind(&self) -> &'static str {
        match self {
            PluginError::Failed(_) => "plugin",
            PluginError::Canceled => "canceled",
            PluginError::Unsupported { .. } => "unsupported",
        }
    }
}

/// Everything a plugin sees for one call
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub repo_id: String,
    /// Importer or distributor id on the repository
    pub plugin_id: String,
    /// Stored plugin config with the call's override config laid over it
    pub config: Map<String, Value>,
    pub cancel: CancelToken,
}

impl PluginContext {
    pub fn new(repo_id: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            plugin_id: plugin_id.into(),
            config: Map::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fail with [`PluginError::Canceled`] once cancellation was requested
    pub fn check_canceled(&self) -> Result<(), PluginError> {
        if self.cancel.is_canceled() {
            Err(PluginError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// A previously uploaded file to import as a content unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub upload_id: String,
    pub unit_type_id: String,
    pub unit_key: Value,
    #[serde(default)]
    pub unit_metadata: Option<Value>,
}
