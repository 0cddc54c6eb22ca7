// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced plugin wrappers for consistent observability

use crate::distributor::Distributor;
use crate::importer::Importer;
use crate::types::{PluginContext, PluginError, UploadRequest};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::Instrument;

fn log_outcome(result: &Result<Value, PluginError>, started: Instant, done: &'static str) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => tracing::info!(elapsed_ms, "{}", done),
        Err(PluginError::Canceled) => tracing::info!(elapsed_ms, "canceled"),
        Err(e) => tracing::error!(elapsed_ms, error = %e, "failed"),
    }
}

/// Wrapper that adds tracing to any Importer
pub struct TracedImporter<I> {
    type_id: String,
    inner: I,
}

impl<I> TracedImporter<I> {
    pub fn new(type_id: impl Into<String>, inner: I) -> Self {
        Self {
            type_id: type_id.into(),
            inner,
        }
    }
}

#[async_trait]
impl<I: Importer> Importer for TracedImporter<I> {
    async fn sync(&self, ctx: &PluginContext) -> Result<Value, PluginError> {
        let span = tracing::info_span!(
            "importer.sync",
            repo_id = %ctx.repo_id,
            importer_id = %ctx.plugin_id,
            type_id = %self.type_id,
        );
        async {
            tracing::info!(config_keys = ctx.config.len(), "starting");
            let started = Instant::now();
            let result = self.inner.sync(ctx).await;
            log_outcome(&result, started, "synced");
            result
        }
        .instrument(span)
        .await
    }

    async fn import_upload(
        &self,
        ctx: &PluginContext,
        upload: &UploadRequest,
    ) -> Result<Value, PluginError> {
        let span = tracing::info_span!(
            "importer.import_upload",
            repo_id = %ctx.repo_id,
            type_id = %self.type_id,
            upload_id = %upload.upload_id,
            unit_type_id = %upload.unit_type_id,
        );
        async {
            let started = Instant::now();
            let result = self.inner.import_upload(ctx, upload).await;
            log_outcome(&result, started, "imported");
            result
        }
        .instrument(span)
        .await
    }

    async fn resolve_dependencies(
        &self,
        ctx: &PluginContext,
        units: &[Value],
        options: &Map<String, Value>,
    ) -> Result<Value, PluginError> {
        let span = tracing::info_span!(
            "importer.resolve_dependencies",
            repo_id = %ctx.repo_id,
            type_id = %self.type_id,
            units = units.len(),
        );
        async {
            let started = Instant::now();
            let result = self.inner.resolve_dependencies(ctx, units, options).await;
            log_outcome(&result, started, "resolved");
            result
        }
        .instrument(span)
        .await
    }

    async fn import_units(
        &self,
        ctx: &PluginContext,
        source_repo_id: &str,
        criteria: &Map<String, Value>,
    ) -> Result<Value, PluginError> {
        let span = tracing::info_span!(
            "importer.import_units",
            repo_id = %ctx.repo_id,
            type_id = %self.type_id,
            source_repo_id,
        );
        async {
            let started = Instant::now();
            let result = self.inner.import_units(ctx, source_repo_id, criteria).await;
            log_outcome(&result, started, "associated");
            result
        }
        .instrument(span)
        .await
    }
}

/// Wrapper that adds tracing to any Distributor
pub struct TracedDistributor<D> {
    type_id: String,
    inner: D,
}

impl<D> TracedDistributor<D> {
    pub fn new(type_id: impl Into<String>, inner: D) -> Self {
        Self {
            type_id: type_id.into(),
            inner,
        }
    }
}

#[async_trait]
impl<D: Distributor> Distributor for TracedDistributor<D> {
    async fn publish(&self, ctx: &PluginContext) -> Result<Value, PluginError> {
        let span = tracing::info_span!(
            "distributor.publish",
            repo_id = %ctx.repo_id,
            distributor_id = %ctx.plugin_id,
            type_id = %self.type_id,
        );
        async {
            tracing::info!("starting");
            let started = Instant::now();
            let result = self.inner.publish(ctx).await;
            log_outcome(&result, started, "published");
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
