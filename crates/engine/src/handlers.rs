// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Repository operations run by the dispatcher

use crate::criteria::{RepoCriteria, UnitCriteria};
use crate::error::WorkError;
use crate::registry::{
    CallArgs, OperationHandler, OperationId, OperationRegistry, TaskContext, WorkRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::{
    validate_repo_id, Clock, HistoryEntry, HistoryKind, HistoryResult, OwnerKey, PluginConfig,
    Repository, RepositoryDelta, OVERRIDE_CONFIG_KEY,
};
use depot_plugins::{PluginContext, PluginError, PluginRegistry, UploadRequest};
use depot_storage::{HistoryStore, RepositoryStore, ScheduleStore, StoreError};
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared state behind every repository operation handler
pub struct RepositoryOps<C: Clock> {
    repos: RepositoryStore,
    schedules: ScheduleStore,
    history: HistoryStore,
    plugins: Arc<PluginRegistry>,
    clock: C,
}

impl<C: Clock> RepositoryOps<C> {
    pub fn new(
        repos: RepositoryStore,
        schedules: ScheduleStore,
        history: HistoryStore,
        plugins: Arc<PluginRegistry>,
        clock: C,
    ) -> Self {
        Self {
            repos,
            schedules,
            history,
            plugins,
            clock,
        }
    }

    /// Register a handler for every [`OperationId`]
    pub fn register(self: &Arc<Self>, registry: &mut OperationRegistry) {
        for operation in OperationId::ALL {
            registry.register(
                operation,
                RepositoryHandler {
                    operation,
                    ops: Arc::clone(self),
                },
            );
        }
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Build and store a new repository with its plugins
    ///
    /// Runs inline rather than as a task: there is nothing to reserve yet.
    pub fn create(&self, args: &CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        validate_repo_id(repo_id).map_err(|e| WorkError::validation(e.to_string()))?;

        let mut repository = Repository::new(repo_id);
        if let Some(name) = args.str("display_name") {
            repository.display_name = name.to_string();
        }
        repository.description = args.str("description").map(str::to_string);
        repository.notes = args.object_or_empty("notes")?;

        if let Some(type_id) = args.str("importer_type_id") {
            self.require_importer_type(type_id)?;
            let config = args.object_or_empty("importer_config")?;
            repository.importer = Some(PluginConfig::new(type_id, type_id).with_config(config));
        }

        if let Some(distributors) = args.get("distributors") {
            let Some(distributors) = distributors.as_array() else {
                return Err(WorkError::validation("distributors must be a list"));
            };
            for entry in distributors {
                let entry = CallArgs {
                    args: Vec::new(),
                    kwargs: entry.as_object().cloned().unwrap_or_default(),
                };
                let distributor = self.distributor_from_args(&entry)?;
                repository
                    .distributors
                    .insert(distributor.id.clone(), distributor);
            }
        }

        let repository = self.repos.create(repository)?;
        tracing::info!(repo_id, "repository created");
        to_json(&repository)
    }

    fn delete(&self, args: &CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        if !self.repos.exists(repo_id) {
            return Err(WorkError::not_found("repository", repo_id));
        }
        let schedules = self.schedules.delete_owned_by(repo_id, None)?;
        self.repos.delete(repo_id)?;
        tracing::info!(
            repo_id,
            schedules = schedules.len(),
            "repository deleted"
        );
        Ok(Value::Null)
    }

    fn update(&self, args: &CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        let delta: RepositoryDelta = match args.get("delta") {
            Some(delta) => serde_json::from_value(delta.clone())
                .map_err(|e| WorkError::validation(format!("invalid delta: {e}")))?,
            None => RepositoryDelta::default(),
        };
        let repository = self.repos.update(repo_id, |repo| {
            repo.apply_delta(&delta);
            Ok(())
        })?;
        to_json(&repository)
    }

    fn add_importer(&self, args: &CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        let type_id = args.require_str("importer_type_id")?;
        self.require_importer_type(type_id)?;
        let importer_id = args.str("importer_id").unwrap_or(type_id);
        let importer = PluginConfig::new(importer_id, type_id)
            .with_config(args.object_or_empty("importer_config")?);

        let mut replaced = None;
        self.repos.update(repo_id, |repo| {
            replaced = repo.importer.replace(importer.clone()).map(|old| old.id);
            Ok(())
        })?;
        if let Some(old) = replaced {
            self.delete_schedules(&OwnerKey::sync(repo_id, old))?;
        }
        tracing::info!(repo_id, importer_id, type_id, "importer added");
        to_json(&importer)
    }

    fn remove_importer(&self, args: &CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        let importer_id = args.require_str("importer_id")?;
        self.repos.update(repo_id, |repo| {
            if repo.importer.as_ref().map(|i| i.id.as_str()) != Some(importer_id) {
                return Err(StoreError::not_found("importer", importer_id));
            }
            repo.importer = None;
            Ok(())
        })?;
        self.delete_schedules(&OwnerKey::sync(repo_id, importer_id))?;
        tracing::info!(repo_id, importer_id, "importer removed");
        Ok(Value::Null)
    }

    fn update_importer(&self, args: &CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        let importer_id = args.require_str("importer_id")?;
        let delta = args.object_or_empty("importer_config")?;
        let repository = self.repos.update(repo_id, |repo| match repo.importer.as_mut() {
            Some(importer) if importer.id == importer_id => {
                importer.merge_config(&delta);
                Ok(())
            }
            _ => Err(StoreError::not_found("importer", importer_id)),
        })?;
        to_json(&repository.importer)
    }

    fn add_distributor(&self, args: &CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        let distributor = self.distributor_from_args(args)?;

        let mut replaced = false;
        self.repos.update(repo_id, |repo| {
            replaced = repo
                .distributors
                .insert(distributor.id.clone(), distributor.clone())
                .is_some();
            Ok(())
        })?;
        if replaced {
            self.delete_schedules(&OwnerKey::publish(repo_id, distributor.id.clone()))?;
        }
        tracing::info!(
            repo_id,
            distributor_id = %distributor.id,
            type_id = %distributor.type_id,
            "distributor added"
        );
        to_json(&distributor)
    }

    fn remove_distributor(&self, args: &CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        let distributor_id = args.require_str("distributor_id")?;
        self.repos.update(repo_id, |repo| {
            repo.distributors
                .remove(distributor_id)
                .map(|_| ())
                .ok_or_else(|| StoreError::not_found("distributor", distributor_id))
        })?;
        self.delete_schedules(&OwnerKey::publish(repo_id, distributor_id))?;
        tracing::info!(repo_id, distributor_id, "distributor removed");
        Ok(Value::Null)
    }

    fn update_distributor(&self, args: &CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        let distributor_id = args.require_str("distributor_id")?;
        let delta = args.object_or_empty("distributor_config")?;
        let auto_publish = args.get("auto_publish").and_then(Value::as_bool);

        let repository = self.repos.update(repo_id, |repo| {
            let distributor = repo
                .distributors
                .get_mut(distributor_id)
                .ok_or_else(|| StoreError::not_found("distributor", distributor_id))?;
            distributor.merge_config(&delta);
            if let Some(auto_publish) = auto_publish {
                distributor.auto_publish = auto_publish;
            }
            Ok(())
        })?;
        to_json(&repository.distributor(distributor_id))
    }

    async fn sync(&self, ctx: &TaskContext, args: &CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        let repository = self.repository(repo_id)?;
        let importer = repository
            .importer
            .as_ref()
            .ok_or_else(|| WorkError::not_found("importer", repo_id))?;
        let plugin = self
            .plugins
            .importer(&importer.type_id)
            .ok_or_else(|| unknown_type("importer", &importer.type_id))?;

        ctx.check_canceled()?;
        let plugin_ctx = plugin_context(ctx, repo_id, importer, args)?;
        let started = self.clock.now();
        let outcome = plugin.sync(&plugin_ctx).await;
        self.record_history(ctx, repo_id, HistoryKind::Sync, importer, started, &outcome);
        let report = outcome?;

        let now = self.clock.now();
        let repository = self.repos.update(repo_id, |repo| {
            repo.last_sync = Some(now);
            Ok(())
        })?;

        for distributor in repository.auto_publish_distributors() {
            let args = CallArgs::new()
                .with("repo_id", repo_id)
                .with("distributor_id", distributor.id.as_str());
            ctx.dispatch_on_success(WorkRequest::new(OperationId::Publish, args));
        }
        Ok(report)
    }

    async fn publish(&self, ctx: &TaskContext, args: &CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        let distributor_id = args.require_str("distributor_id")?;
        let repository = self.repository(repo_id)?;
        let distributor = repository
            .distributor(distributor_id)
            .ok_or_else(|| WorkError::not_found("distributor", distributor_id))?;
        let plugin = self
            .plugins
            .distributor(&distributor.type_id)
            .ok_or_else(|| unknown_type("distributor", &distributor.type_id))?;

        ctx.check_canceled()?;
        let plugin_ctx = plugin_context(ctx, repo_id, distributor, args)?;
        let started = self.clock.now();
        let outcome = plugin.publish(&plugin_ctx).await;
        self.record_history(ctx, repo_id, HistoryKind::Publish, distributor, started, &outcome);
        let report = outcome?;

        let now = self.clock.now();
        self.repos.update(repo_id, |repo| {
            repo.last_publish = Some(now);
            Ok(())
        })?;
        Ok(report)
    }

    async fn import_upload(&self, ctx: &TaskContext, args: &CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        let upload = UploadRequest {
            upload_id: args.require_str("upload_id")?.to_string(),
            unit_type_id: args.require_str("unit_type_id")?.to_string(),
            unit_key: args
                .get("unit_key")
                .cloned()
                .ok_or_else(|| WorkError::validation("missing required argument: unit_key"))?,
            unit_metadata: args.get("unit_metadata").cloned(),
        };
        let repository = self.repository(repo_id)?;
        let importer = repository
            .importer
            .as_ref()
            .ok_or_else(|| WorkError::not_found("importer", repo_id))?;
        let plugin = self
            .plugins
            .importer(&importer.type_id)
            .ok_or_else(|| unknown_type("importer", &importer.type_id))?;

        let plugin_ctx = plugin_context(ctx, repo_id, importer, args)?;
        Ok(plugin.import_upload(&plugin_ctx, &upload).await?)
    }

    async fn resolve_dependencies(
        &self,
        ctx: &TaskContext,
        args: &CallArgs,
    ) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        let units = match args.get("units") {
            None => Vec::new(),
            Some(Value::Array(units)) => units.clone(),
            Some(_) => return Err(WorkError::validation("units must be a list")),
        };
        let options = args.object_or_empty("options")?;
        let repository = self.repository(repo_id)?;
        let importer = repository
            .importer
            .as_ref()
            .ok_or_else(|| WorkError::not_found("importer", repo_id))?;
        let plugin = self
            .plugins
            .importer(&importer.type_id)
            .ok_or_else(|| unknown_type("importer", &importer.type_id))?;

        let plugin_ctx = plugin_context(ctx, repo_id, importer, args)?;
        Ok(plugin
            .resolve_dependencies(&plugin_ctx, &units, &options)
            .await?)
    }

    /// Copy units from the source repository through the destination's importer
    async fn associate(&self, ctx: &TaskContext, args: &CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        let source_repo_id = args.require_str("source_repo_id")?;
        let criteria = match args.get("criteria") {
            Some(criteria) => UnitCriteria::parse(criteria).map_err(WorkError::Validation)?,
            None => UnitCriteria::default(),
        };
        let repository = self.repository(repo_id)?;
        if !self.repos.exists(source_repo_id) {
            return Err(WorkError::validation(format!(
                "source repository not found: {source_repo_id}"
            )));
        }
        let importer = repository
            .importer
            .as_ref()
            .ok_or_else(|| WorkError::not_found("importer", repo_id))?;
        let plugin = self
            .plugins
            .importer(&importer.type_id)
            .ok_or_else(|| unknown_type("importer", &importer.type_id))?;

        ctx.check_canceled()?;
        let plugin_ctx = plugin_context(ctx, repo_id, importer, args)?;
        let report = plugin
            .import_units(&plugin_ctx, source_repo_id, &criteria.to_map())
            .await?;
        tracing::info!(repo_id, source_repo_id, "units associated");
        Ok(report)
    }

    fn regenerate_applicability(&self, args: &CallArgs) -> Result<Value, WorkError> {
        let criteria = args
            .get("repo_criteria")
            .ok_or_else(|| WorkError::validation("missing required argument: repo_criteria"))?;
        let criteria = RepoCriteria::parse(criteria).map_err(WorkError::Validation)?;
        let repo_ids = criteria.select(&self.repos.list());
        tracing::info!(repos = repo_ids.len(), "applicability regeneration matched");
        Ok(json!({ "repo_ids": repo_ids }))
    }

    /// History is best effort: a failed write is logged and the task's own
    /// outcome stands
    fn record_history(
        &self,
        ctx: &TaskContext,
        repo_id: &str,
        kind: HistoryKind,
        plugin: &PluginConfig,
        started: DateTime<Utc>,
        outcome: &Result<Value, PluginError>,
    ) {
        let entry = HistoryEntry {
            task_id: ctx.task_id.clone(),
            repo_id: repo_id.to_string(),
            kind,
            plugin_id: plugin.id.clone(),
            plugin_type_id: plugin.type_id.clone(),
            started,
            completed: self.clock.now(),
            result: HistoryResult::Success,
            summary: Value::Null,
            error_message: None,
        };
        let entry = match outcome {
            Ok(report) => entry.succeeded(report.clone()),
            Err(PluginError::Canceled) => entry.failed(HistoryResult::Canceled, "canceled"),
            Err(e) => entry.failed(HistoryResult::Failed, e.to_string()),
        };
        if let Err(e) = self.history.record(entry) {
            tracing::warn!(task_id = %ctx.task_id, %kind, error = %e, "failed to record history");
        }
    }

    fn repository(&self, repo_id: &str) -> Result<Repository, WorkError> {
        self.repos.get(repo_id).map_err(|e| match e {
            StoreError::NotFound { .. } => WorkError::not_found("repository", repo_id),
            other => other.into(),
        })
    }

    fn require_importer_type(&self, type_id: &str) -> Result<(), WorkError> {
        match self.plugins.importer(type_id) {
            Some(_) => Ok(()),
            None => Err(unknown_type("importer", type_id)),
        }
    }

    fn distributor_from_args(&self, args: &CallArgs) -> Result<PluginConfig, WorkError> {
        let type_id = args.require_str("distributor_type_id")?;
        if self.plugins.distributor(type_id).is_none() {
            return Err(unknown_type("distributor", type_id));
        }
        let distributor_id = args.str("distributor_id").unwrap_or(type_id);
        Ok(PluginConfig::new(distributor_id, type_id)
            .with_config(args.object_or_empty("distributor_config")?)
            .auto_publish(
                args.get("auto_publish")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            ))
    }

    fn delete_schedules(&self, owner: &OwnerKey) -> Result<(), WorkError> {
        for schedule in self.schedules.list(owner) {
            match self.schedules.delete(&schedule.id) {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Handler for one operation, sharing [`RepositoryOps`] with the others
struct RepositoryHandler<C: Clock> {
    operation: OperationId,
    ops: Arc<RepositoryOps<C>>,
}

#[async_trait]
impl<C: Clock> OperationHandler for RepositoryHandler<C> {
    fn validate(&self, args: &CallArgs) -> Result<(), WorkError> {
        match self.operation {
            OperationId::RegenerateApplicability => {
                let criteria = args.get("repo_criteria").ok_or_else(|| {
                    WorkError::validation("missing required argument: repo_criteria")
                })?;
                RepoCriteria::parse(criteria).map_err(WorkError::Validation)?;
                return Ok(());
            }
            _ => {
                args.require_str("repo_id")?;
            }
        }

        match self.operation {
            OperationId::ImporterAdd => {
                args.require_str("importer_type_id")?;
            }
            OperationId::ImporterRemove => {
                args.require_str("importer_id")?;
            }
            OperationId::ImporterUpdate => {
                args.require_str("importer_id")?;
                if args.object("importer_config").is_none() {
                    return Err(WorkError::validation("importer_config must be an object"));
                }
            }
            OperationId::DistributorAdd => {
                args.require_str("distributor_type_id")?;
            }
            OperationId::DistributorRemove | OperationId::Publish => {
                args.require_str("distributor_id")?;
            }
            OperationId::DistributorUpdate => {
                args.require_str("distributor_id")?;
                if args.object("distributor_config").is_none() {
                    return Err(WorkError::validation(
                        "distributor_config must be an object",
                    ));
                }
            }
            OperationId::ImportUpload => {
                args.require_str("upload_id")?;
                args.require_str("unit_type_id")?;
                if args.get("unit_key").is_none() {
                    return Err(WorkError::validation("missing required argument: unit_key"));
                }
            }
            OperationId::Associate => {
                args.require_str("source_repo_id")?;
                if let Some(criteria) = args.get("criteria") {
                    UnitCriteria::parse(criteria).map_err(WorkError::Validation)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn run(&self, ctx: TaskContext, args: CallArgs) -> Result<Value, WorkError> {
        let ops = &self.ops;
        match self.operation {
            OperationId::RepoDelete => ops.delete(&args),
            OperationId::RepoUpdate => ops.update(&args),
            OperationId::ImporterAdd => ops.add_importer(&args),
            OperationId::ImporterRemove => ops.remove_importer(&args),
            OperationId::ImporterUpdate => ops.update_importer(&args),
            OperationId::DistributorAdd => ops.add_distributor(&args),
            OperationId::DistributorRemove => ops.remove_distributor(&args),
            OperationId::DistributorUpdate => ops.update_distributor(&args),
            OperationId::Sync => ops.sync(&ctx, &args).await,
            OperationId::Publish => ops.publish(&ctx, &args).await,
            OperationId::ImportUpload => ops.import_upload(&ctx, &args).await,
            OperationId::ResolveDependencies => ops.resolve_dependencies(&ctx, &args).await,
            OperationId::RegenerateApplicability => ops.regenerate_applicability(&args),
            OperationId::Associate => ops.associate(&ctx, &args).await,
        }
    }
}

/// Plugin call context: stored config with the call's overrides on top
fn plugin_context(
    ctx: &TaskContext,
    repo_id: &str,
    plugin: &PluginConfig,
    args: &CallArgs,
) -> Result<PluginContext, WorkError> {
    let mut config = plugin.config.clone();
    for (key, value) in args.object_or_empty(OVERRIDE_CONFIG_KEY)? {
        config.insert(key, value);
    }
    Ok(PluginContext::new(repo_id, plugin.id.as_str())
        .with_config(config)
        .with_cancel(ctx.cancel.clone()))
}

fn unknown_type(kind: &str, type_id: &str) -> WorkError {
    WorkError::validation(format!("unknown {kind} type: {type_id}"))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, WorkError> {
    serde_json::to_value(value).map_err(|e| WorkError::validation(e.to_string()))
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
