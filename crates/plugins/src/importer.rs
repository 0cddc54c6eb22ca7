// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Importers bring content into a repository

use crate::types::{PluginContext, PluginError, UploadRequest};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Plugin that syncs content from a feed and imports uploads
#[async_trait]
pub trait Importer: Send + Sync + 'static {
    /// Pull content from the configured feed; returns a sync report
    async fn sync(&self, ctx: &PluginContext) -> Result<Value, PluginError>;

    async fn import_upload(
        &self,
        ctx: &PluginContext,
        upload: &UploadRequest,
    ) -> Result<Value, PluginError>;

    /// Resolve the dependencies of `units` within the repository
    async fn resolve_dependencies(
        &self,
        ctx: &PluginContext,
        units: &[Value],
        options: &Map<String, Value>,
    ) -> Result<Value, PluginError>;

    /// Copy units matching `criteria` from `source_repo_id` into the context's repository
    async fn import_units(
        &self,
        ctx: &PluginContext,
        source_repo_id: &str,
        criteria: &Map<String, Value>,
    ) -> Result<Value, PluginError>;
}

/// Importer that does nothing.
///
/// Registered for plugin types with no real implementation in this process.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpImporter;

impl NoOpImporter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Importer for NoOpImporter {
    async fn sync(&self, ctx: &PluginContext) -> Result<Value, PluginError> {
        ctx.check_canceled()?;
        Ok(json!({"added_count": 0, "removed_count": 0}))
    }

    async fn import_upload(
        &self,
        ctx: &PluginContext,
        upload: &UploadRequest,
    ) -> Result<Value, PluginError> {
        ctx.check_canceled()?;
        Ok(json!({"upload_id": upload.upload_id, "unit_key": upload.unit_key}))
    }

    async fn resolve_dependencies(
        &self,
        ctx: &PluginContext,
        _units: &[Value],
        _options: &Map<String, Value>,
    ) -> Result<Value, PluginError> {
        ctx.check_canceled()?;
        Ok(json!({"resolved": []}))
    }

    async fn import_units(
        &self,
        ctx: &PluginContext,
        _source_repo_id: &str,
        _criteria: &Map<String, Value>,
    ) -> Result<Value, PluginError> {
        ctx.check_canceled()?;
        Ok(json!({"units_successful": []}))
    }
}
