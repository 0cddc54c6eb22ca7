// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake plugins for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use crate::distributor::Distributor;
use crate::importer::Importer;
use crate::types::{PluginContext, PluginError, UploadRequest};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Time span during which one fake call was executing
#[derive(Debug, Clone)]
pub struct RunWindow {
    pub repo_id: String,
    pub started: Instant,
    pub finished: Instant,
}

impl RunWindow {
    pub fn overlaps(&self, other: &RunWindow) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

#[derive(Default)]
struct ScriptState {
    failures: Mutex<VecDeque<String>>,
    always_fail: Mutex<Option<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    delay: Mutex<Option<Duration>>,
    windows: Mutex<Vec<RunWindow>>,
    entered: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Scripted behaviour shared by the fake plugins
///
/// Calls can be made to fail, to block until released, or to take a fixed
/// time. Every finished call leaves a [`RunWindow`] behind.
#[derive(Clone, Default)]
pub struct FakeScript {
    state: Arc<ScriptState>,
}

impl FakeScript {
    /// Fail the next call with `message`; queued failures are used in order
    pub fn fail_next(&self, message: impl Into<String>) {
        self.state
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message.into());
    }

    /// Fail every call from now on
    pub fn fail_always(&self, message: impl Into<String>) {
        *self
            .state
            .always_fail
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }

    /// Make calls block until [`release`](Self::release) or [`open`](Self::open)
    pub fn hold(&self) {
        *self.state.gate.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held calls proceed
    pub fn release(&self, n: usize) {
        if let Some(gate) = self.gate() {
            gate.add_permits(n);
        }
    }

    /// Stop holding calls, letting every blocked call proceed
    pub fn open(&self) {
        if let Some(gate) = self
            .state
            .gate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            gate.close();
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    /// Number of calls that have begun executing
    pub fn entered(&self) -> usize {
        self.state.entered.load(Ordering::SeqCst)
    }

    /// Poll until at least `n` calls have begun, or `timeout` passes
    pub async fn wait_entered(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.entered() < n {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    pub fn windows(&self) -> Vec<RunWindow> {
        self.state
            .windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Highest number of calls observed executing at once
    pub fn max_concurrency(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    fn gate(&self) -> Option<Arc<Semaphore>> {
        self.state
            .gate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn run(&self, ctx: &PluginContext, success: Value) -> Result<Value, PluginError> {
        let started = Instant::now();
        self.state.entered.fetch_add(1, Ordering::SeqCst);
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(active, Ordering::SeqCst);

        let result = self.execute(ctx, success).await;

        self.state.active.fetch_sub(1, Ordering::SeqCst);
        self.state
            .windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RunWindow {
                repo_id: ctx.repo_id.clone(),
                started,
                finished: Instant::now(),
            });
        result
    }

    async fn execute(&self, ctx: &PluginContext, success: Value) -> Result<Value, PluginError> {
        if let Some(gate) = self.gate() {
            tokio::select! {
                permit = gate.acquire() => {
                    // A closed gate lets everyone through
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
                _ = ctx.cancel.canceled() => return Err(PluginError::Canceled),
            }
        }

        let delay = *self.state.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancel.canceled() => return Err(PluginError::Canceled),
            }
        }

        let scripted = self
            .state
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let always = self
            .state
            .always_fail
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match scripted.or(always) {
            Some(message) => Err(PluginError::Failed(message)),
            None => Ok(success),
        }
    }
}

/// Recorded importer call
#[derive(Debug, Clone, PartialEq)]
pub enum ImporterCall {
    Sync {
        repo_id: String,
        config: Map<String, Value>,
    },
    ImportUpload {
        repo_id: String,
        upload_id: String,
    },
    ResolveDependencies {
        repo_id: String,
        units: usize,
    },
    ImportUnits {
        repo_id: String,
        source_repo_id: String,
        criteria: Map<String, Value>,
    },
}

/// Fake importer for testing
#[derive(Clone, Default)]
pub struct FakeImporter {
    calls: Arc<Mutex<Vec<ImporterCall>>>,
    script: FakeScript,
}

impl FakeImporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<ImporterCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn script(&self) -> &FakeScript {
        &self.script
    }

    fn record(&self, call: ImporterCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

#[async_trait]
impl Importer for FakeImporter {
    async fn sync(&self, ctx: &PluginContext) -> Result<Value, PluginError> {
        self.record(ImporterCall::Sync {
            repo_id: ctx.repo_id.clone(),
            config: ctx.config.clone(),
        });
        self.script
            .run(ctx, json!({"added_count": 1, "removed_count": 0}))
            .await
    }

    async fn import_upload(
        &self,
        ctx: &PluginContext,
        upload: &UploadRequest,
    ) -> Result<Value, PluginError> {
        self.record(ImporterCall::ImportUpload {
            repo_id: ctx.repo_id.clone(),
            upload_id: upload.upload_id.clone(),
        });
        self.script
            .run(ctx, json!({"unit_key": upload.unit_key}))
            .await
    }

    async fn resolve_dependencies(
        &self,
        ctx: &PluginContext,
        units: &[Value],
        _options: &Map<String, Value>,
    ) -> Result<Value, PluginError> {
        self.record(ImporterCall::ResolveDependencies {
            repo_id: ctx.repo_id.clone(),
            units: units.len(),
        });
        self.script.run(ctx, json!({"resolved": units})).await
    }

    async fn import_units(
        &self,
        ctx: &PluginContext,
        source_repo_id: &str,
        criteria: &Map<String, Value>,
    ) -> Result<Value, PluginError> {
        self.record(ImporterCall::ImportUnits {
            repo_id: ctx.repo_id.clone(),
            source_repo_id: source_repo_id.to_string(),
            criteria: criteria.clone(),
        });
        self.script
            .run(ctx, json!({"units_successful": [], "source_repo_id": source_repo_id}))
            .await
    }
}

/// Recorded distributor call
#[derive(Debug, Clone, PartialEq)]
pub enum DistributorCall {
    Publish {
        repo_id: String,
        distributor_id: String,
        config: Map<String, Value>,
    },
}

/// Fake distributor for testing
#[derive(Clone, Default)]
pub struct FakeDistributor {
    calls: Arc<Mutex<Vec<DistributorCall>>>,
    script: FakeScript,
}

impl FakeDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<DistributorCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn script(&self) -> &FakeScript {
        &self.script
    }
}

#[async_trait]
impl Distributor for FakeDistributor {
    async fn publish(&self, ctx: &PluginContext) -> Result<Value, PluginError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(DistributorCall::Publish {
                repo_id: ctx.repo_id.clone(),
                distributor_id: ctx.plugin_id.clone(),
                config: ctx.config.clone(),
            });
        self.script
            .run(ctx, json!({"published": ctx.plugin_id}))
            .await
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
