// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributors publish repository content

use crate::types::{PluginContext, PluginError};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Plugin that publishes a repository to clients
#[async_trait]
pub trait Distributor: Send + Sync + 'static {
    async fn publish(&self, ctx: &PluginContext) -> Result<Value, PluginError>;
}

/// Distributor that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpDistributor;

impl NoOpDistributor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Distributor for NoOpDistributor {
    async fn publish(&self, ctx: &PluginContext) -> Result<Value, PluginError> {
        ctx.check_canceled()?;
        Ok(json!({"published": ctx.repo_id}))
    }
}
