// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Caller-facing repository operations
//!
//! Each operation either completes synchronously or is accepted as a task.
//! Argument problems are reported before any task exists.

use crate::criteria::{RepoCriteria, UnitCriteria};
use crate::dispatcher::{CancelOutcome, Dispatcher};
use crate::error::ServiceError;
use crate::handlers::RepositoryOps;
use crate::registry::{CallArgs, OperationId, WorkRequest};
use depot_core::{
    CallSpec, Clock, HistoryKind, IdGen, OwnerKey, RepositoryDelta, Schedule, ScheduleId,
    ScheduleSpec, ScheduleUpdate, ScheduledAction, TaskId, TaskResult,
};
use depot_storage::{RepositoryStore, ScheduleStore, TaskFilter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// How an operation was carried out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum CallOutcome {
    /// Done; the value is the operation's result
    Completed(Value),
    /// Dispatched; poll the task for the result
    Accepted(TaskResult),
}

impl CallOutcome {
    pub fn task(&self) -> Option<&TaskResult> {
        match self {
            CallOutcome::Accepted(task) => Some(task),
            CallOutcome::Completed(_) => None,
        }
    }
}

/// Repository operations as received from a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RepoCommand {
    Create {
        id: String,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        notes: Map<String, Value>,
        #[serde(default)]
        importer_type_id: Option<String>,
        #[serde(default)]
        importer_config: Option<Map<String, Value>>,
        #[serde(default)]
        distributors: Vec<Value>,
    },
    Get {
        id: String,
    },
    List,
    Delete {
        id: String,
    },
    Update {
        id: String,
        #[serde(default)]
        delta: RepositoryDelta,
    },
    AddImporter {
        repo_id: String,
        #[serde(default)]
        importer_type_id: Option<String>,
        #[serde(default)]
        importer_config: Option<Map<String, Value>>,
    },
    RemoveImporter {
        repo_id: String,
        importer_id: String,
    },
    UpdateImporter {
        repo_id: String,
        importer_id: String,
        #[serde(default)]
        importer_config: Option<Value>,
    },
    AddDistributor {
        repo_id: String,
        #[serde(default)]
        distributor_type_id: Option<String>,
        #[serde(default)]
        distributor_id: Option<String>,
        #[serde(default)]
        distributor_config: Option<Map<String, Value>>,
        #[serde(default)]
        auto_publish: bool,
    },
    RemoveDistributor {
        repo_id: String,
        distributor_id: String,
    },
    UpdateDistributor {
        repo_id: String,
        distributor_id: String,
        #[serde(default)]
        distributor_config: Option<Value>,
        #[serde(default)]
        auto_publish: Option<bool>,
    },
    Sync {
        repo_id: String,
        #[serde(default)]
        override_config: Option<Map<String, Value>>,
    },
    Publish {
        repo_id: String,
        #[serde(default)]
        distributor_id: Option<String>,
        #[serde(default)]
        override_config: Option<Map<String, Value>>,
    },
    ImportUpload {
        repo_id: String,
        #[serde(default)]
        upload_id: Option<String>,
        #[serde(default)]
        unit_type_id: Option<String>,
        #[serde(default)]
        unit_key: Option<Value>,
        #[serde(default)]
        unit_metadata: Option<Value>,
        #[serde(default)]
        override_config: Option<Map<String, Value>>,
    },
    ResolveDependencies {
        repo_id: String,
        #[serde(default)]
        units: Vec<Value>,
        #[serde(default)]
        options: Map<String, Value>,
    },
    RegenerateApplicability {
        #[serde(default)]
        repo_criteria: Option<Value>,
    },
    /// Copy units from `source_repo_id` into `repo_id`
    Associate {
        repo_id: String,
        #[serde(default)]
        source_repo_id: Option<String>,
        #[serde(default)]
        criteria: Option<Value>,
        #[serde(default)]
        override_config: Option<Map<String, Value>>,
    },
    SyncHistory {
        repo_id: String,
        /// Positive integer, as a number or a numeric string
        #[serde(default)]
        limit: Option<Value>,
    },
    PublishHistory {
        repo_id: String,
        distributor_id: String,
        #[serde(default)]
        limit: Option<Value>,
    },
}

/// Schedule creation input as received from a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub override_config: Option<Map<String, Value>>,
}

/// Façade over the catalog, the dispatcher and the schedule store
pub struct RepositoryService<C: Clock, I: IdGen> {
    ops: Arc<RepositoryOps<C>>,
    dispatcher: Dispatcher<C, I>,
    repos: RepositoryStore,
    schedules: ScheduleStore,
    clock: C,
    ids: I,
}

impl<C: Clock, I: IdGen> RepositoryService<C, I> {
    pub fn new(
        ops: Arc<RepositoryOps<C>>,
        dispatcher: Dispatcher<C, I>,
        repos: RepositoryStore,
        schedules: ScheduleStore,
        clock: C,
        ids: I,
    ) -> Self {
        Self {
            ops,
            dispatcher,
            repos,
            schedules,
            clock,
            ids,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<C, I> {
        &self.dispatcher
    }

    pub fn execute(&self, command: RepoCommand) -> Result<CallOutcome, ServiceError> {
        match command {
            RepoCommand::Create {
                id,
                display_name,
                description,
                notes,
                importer_type_id,
                importer_config,
                distributors,
            } => {
                let mut args = CallArgs::new()
                    .with("repo_id", id)
                    .with("notes", notes)
                    .with("distributors", distributors);
                args = with_opt(args, "display_name", display_name);
                args = with_opt(args, "description", description);
                args = with_opt(args, "importer_type_id", importer_type_id);
                args = with_opt(args, "importer_config", importer_config);
                Ok(CallOutcome::Completed(self.ops.create(&args)?))
            }

            RepoCommand::Get { id } => {
                let repository = self.repos.get(&id)?;
                Ok(CallOutcome::Completed(to_value(&repository)?))
            }

            RepoCommand::List => Ok(CallOutcome::Completed(to_value(&self.repos.list())?)),

            RepoCommand::Delete { id } => {
                self.require_repo(&id)?;
                self.accept(OperationId::RepoDelete, CallArgs::new().with("repo_id", id))
            }

            RepoCommand::Update { id, delta } => {
                self.require_repo(&id)?;
                let args = CallArgs::new()
                    .with("repo_id", id)
                    .with("delta", to_value(&delta)?);
                self.accept(OperationId::RepoUpdate, args)
            }

            RepoCommand::AddImporter {
                repo_id,
                importer_type_id,
                importer_config,
            } => {
                let type_id = required(importer_type_id, "importer_type_id")?;
                if self.ops.plugins().importer(&type_id).is_none() {
                    return Err(ServiceError::validation(format!(
                        "unknown importer type: {type_id}"
                    )));
                }
                let args = CallArgs::new()
                    .with("repo_id", repo_id)
                    .with("importer_type_id", type_id)
                    .with("importer_config", importer_config.unwrap_or_default());
                self.accept(OperationId::ImporterAdd, args)
            }

            RepoCommand::RemoveImporter {
                repo_id,
                importer_id,
            } => {
                let args = CallArgs::new()
                    .with("repo_id", repo_id)
                    .with("importer_id", importer_id);
                self.accept(OperationId::ImporterRemove, args)
            }

            RepoCommand::UpdateImporter {
                repo_id,
                importer_id,
                importer_config,
            } => {
                let config = required_object(importer_config, "importer_config")?;
                let args = CallArgs::new()
                    .with("repo_id", repo_id)
                    .with("importer_id", importer_id)
                    .with("importer_config", config);
                self.accept(OperationId::ImporterUpdate, args)
            }

            RepoCommand::AddDistributor {
                repo_id,
                distributor_type_id,
                distributor_id,
                distributor_config,
                auto_publish,
            } => {
                let type_id = required(distributor_type_id, "distributor_type_id")?;
                if self.ops.plugins().distributor(&type_id).is_none() {
                    return Err(ServiceError::validation(format!(
                        "unknown distributor type: {type_id}"
                    )));
                }
                let distributor_id = distributor_id.unwrap_or_else(|| type_id.clone());
                let args = CallArgs::new()
                    .with("repo_id", repo_id)
                    .with("distributor_type_id", type_id)
                    .with("distributor_id", distributor_id)
                    .with("distributor_config", distributor_config.unwrap_or_default())
                    .with("auto_publish", auto_publish);
                self.accept(OperationId::DistributorAdd, args)
            }

            RepoCommand::RemoveDistributor {
                repo_id,
                distributor_id,
            } => {
                self.require_distributor(&repo_id, &distributor_id)?;
                let args = CallArgs::new()
                    .with("repo_id", repo_id)
                    .with("distributor_id", distributor_id);
                self.accept(OperationId::DistributorRemove, args)
            }

            RepoCommand::UpdateDistributor {
                repo_id,
                distributor_id,
                distributor_config,
                auto_publish,
            } => {
                let config = required_object(distributor_config, "distributor_config")?;
                self.require_distributor(&repo_id, &distributor_id)?;
                let mut args = CallArgs::new()
                    .with("repo_id", repo_id)
                    .with("distributor_id", distributor_id)
                    .with("distributor_config", config);
                args = with_opt(args, "auto_publish", auto_publish);
                self.accept(OperationId::DistributorUpdate, args)
            }

            RepoCommand::Sync {
                repo_id,
                override_config,
            } => {
                let args = CallArgs::new()
                    .with("repo_id", repo_id)
                    .with("override_config", override_config.unwrap_or_default());
                self.accept(OperationId::Sync, args)
            }

            RepoCommand::Publish {
                repo_id,
                distributor_id,
                override_config,
            } => {
                let distributor_id = required(distributor_id, "distributor_id")?;
                let args = CallArgs::new()
                    .with("repo_id", repo_id)
                    .with("distributor_id", distributor_id)
                    .with("override_config", override_config.unwrap_or_default());
                self.accept(OperationId::Publish, args)
            }

            RepoCommand::ImportUpload {
                repo_id,
                upload_id,
                unit_type_id,
                unit_key,
                unit_metadata,
                override_config,
            } => {
                let upload_id = required(upload_id, "upload_id")?;
                let unit_type_id = required(unit_type_id, "unit_type_id")?;
                let unit_key = required(unit_key.filter(|k| !k.is_null()), "unit_key")?;
                let mut args = CallArgs::new()
                    .with("repo_id", repo_id)
                    .with("upload_id", upload_id)
                    .with("unit_type_id", unit_type_id)
                    .with("unit_key", unit_key)
                    .with("override_config", override_config.unwrap_or_default());
                args = with_opt(args, "unit_metadata", unit_metadata);
                self.accept(OperationId::ImportUpload, args)
            }

            RepoCommand::ResolveDependencies {
                repo_id,
                units,
                options,
            } => {
                let args = CallArgs::new()
                    .with("repo_id", repo_id)
                    .with("units", units)
                    .with("options", options);
                self.accept(OperationId::ResolveDependencies, args)
            }

            RepoCommand::RegenerateApplicability { repo_criteria } => {
                let criteria = required_object(repo_criteria, "repo_criteria")?;
                RepoCriteria::parse(&Value::Object(criteria.clone()))
                    .map_err(ServiceError::Validation)?;
                let args = CallArgs::new().with("repo_criteria", criteria);
                self.accept(OperationId::RegenerateApplicability, args)
            }

            RepoCommand::Associate {
                repo_id,
                source_repo_id,
                criteria,
                override_config,
            } => {
                let source_repo_id = required(source_repo_id, "source_repo_id")?;
                let criteria = criteria.filter(|c| !c.is_null());
                if let Some(criteria) = &criteria {
                    UnitCriteria::parse(criteria).map_err(ServiceError::Validation)?;
                }
                self.require_repo(&repo_id)?;
                if !self.repos.exists(&source_repo_id) {
                    return Err(ServiceError::validation(format!(
                        "source repository not found: {source_repo_id}"
                    )));
                }
                let mut args = CallArgs::new()
                    .with("repo_id", repo_id)
                    .with("source_repo_id", source_repo_id)
                    .with("override_config", override_config.unwrap_or_default());
                args = with_opt(args, "criteria", criteria);
                self.accept(OperationId::Associate, args)
            }

            RepoCommand::SyncHistory { repo_id, limit } => {
                let limit = history_limit(limit)?;
                self.require_repo(&repo_id)?;
                let entries = self
                    .ops
                    .history()
                    .list(&repo_id, HistoryKind::Sync, None, limit);
                Ok(CallOutcome::Completed(to_value(&entries)?))
            }

            RepoCommand::PublishHistory {
                repo_id,
                distributor_id,
                limit,
            } => {
                let limit = history_limit(limit)?;
                self.require_distributor(&repo_id, &distributor_id)?;
                let entries = self.ops.history().list(
                    &repo_id,
                    HistoryKind::Publish,
                    Some(&distributor_id),
                    limit,
                );
                Ok(CallOutcome::Completed(to_value(&entries)?))
            }
        }
    }

    pub fn create_schedule(
        &self,
        owner: OwnerKey,
        request: ScheduleRequest,
    ) -> Result<Schedule, ServiceError> {
        let interval = required(request.schedule, "schedule")?;
        self.require_owner(&owner)?;

        let call = match owner.action {
            ScheduledAction::Sync => CallSpec::new(OperationId::Sync.as_str(), vec![])
                .with_kwarg("repo_id", Value::String(owner.repo_id.clone()))
                .with_kwarg("importer_id", Value::String(owner.plugin_id.clone())),
            ScheduledAction::Publish => CallSpec::new(OperationId::Publish.as_str(), vec![])
                .with_kwarg("repo_id", Value::String(owner.repo_id.clone()))
                .with_kwarg("distributor_id", Value::String(owner.plugin_id.clone())),
        };

        let mut spec = ScheduleSpec::new(owner, call, interval);
        spec.failure_threshold = request.failure_threshold;
        spec.enabled = request.enabled;
        spec.override_config = request.override_config;

        let id = ScheduleId::from(self.ids.schedule_id());
        Ok(self.schedules.create(id, spec, self.clock.now())?)
    }

    pub fn list_schedules(&self, owner: &OwnerKey) -> Result<Vec<Schedule>, ServiceError> {
        self.require_owner(owner)?;
        Ok(self.schedules.list(owner))
    }

    pub fn get_schedule(&self, owner: &OwnerKey, id: &ScheduleId) -> Result<Schedule, ServiceError> {
        self.require_owner(owner)?;
        let schedule = self.schedules.get(id)?;
        if schedule.owner != *owner {
            return Err(ServiceError::not_found("schedule", id.0.clone()));
        }
        Ok(schedule)
    }

    pub fn update_schedule(
        &self,
        owner: &OwnerKey,
        id: &ScheduleId,
        update: ScheduleUpdate,
    ) -> Result<Schedule, ServiceError> {
        self.get_schedule(owner, id)?;
        Ok(self.schedules.update(id, update, self.clock.now())?)
    }

    pub fn delete_schedule(&self, owner: &OwnerKey, id: &ScheduleId) -> Result<(), ServiceError> {
        self.get_schedule(owner, id)?;
        Ok(self.schedules.delete(id)?)
    }

    pub fn task(&self, task_id: &TaskId) -> Result<TaskResult, ServiceError> {
        Ok(self.dispatcher.get(task_id)?.to_result())
    }

    pub fn tasks(&self, filter: &TaskFilter) -> Vec<TaskResult> {
        self.dispatcher
            .tasks()
            .list(filter)
            .iter()
            .map(|record| record.to_result())
            .collect()
    }

    pub fn cancel_task(&self, task_id: &TaskId) -> Result<CancelOutcome, ServiceError> {
        Ok(self.dispatcher.cancel(task_id)?)
    }

    fn accept(&self, operation: OperationId, args: CallArgs) -> Result<CallOutcome, ServiceError> {
        let task = self.dispatcher.dispatch(WorkRequest::new(operation, args))?;
        Ok(CallOutcome::Accepted(task))
    }

    fn require_repo(&self, repo_id: &str) -> Result<(), ServiceError> {
        if self.repos.exists(repo_id) {
            Ok(())
        } else {
            Err(ServiceError::not_found("repository", repo_id))
        }
    }

    fn require_distributor(&self, repo_id: &str, distributor_id: &str) -> Result<(), ServiceError> {
        let repository = self.repos.get(repo_id)?;
        match repository.distributor(distributor_id) {
            Some(_) => Ok(()),
            None => Err(ServiceError::not_found("distributor", distributor_id)),
        }
    }

    /// The repository and the importer or distributor a schedule hangs off
    fn require_owner(&self, owner: &OwnerKey) -> Result<(), ServiceError> {
        let repository = self.repos.get(&owner.repo_id)?;
        let exists = match owner.action {
            ScheduledAction::Sync => repository
                .importer
                .as_ref()
                .is_some_and(|i| i.id == owner.plugin_id),
            ScheduledAction::Publish => repository.distributor(&owner.plugin_id).is_some(),
        };
        if exists {
            Ok(())
        } else {
            let kind = match owner.action {
                ScheduledAction::Sync => "importer",
                ScheduledAction::Publish => "distributor",
            };
            Err(ServiceError::not_found(kind, owner.plugin_id.clone()))
        }
    }
}

fn with_opt<T: Into<Value>>(args: CallArgs, key: &str, value: Option<T>) -> CallArgs {
    match value {
        Some(value) => args.with(key, value),
        None => args,
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ServiceError> {
    value.ok_or_else(|| ServiceError::validation(format!("missing required field: {field}")))
}

fn required_object(value: Option<Value>, field: &str) -> Result<Map<String, Value>, ServiceError> {
    match value {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(ServiceError::validation(format!("{field} must be an object"))),
        None => Err(ServiceError::validation(format!(
            "missing required field: {field}"
        ))),
    }
}

/// `limit` for history listings: absent, or a positive integer given as a
/// number or a numeric string
fn history_limit(limit: Option<Value>) -> Result<Option<usize>, ServiceError> {
    let parsed = match limit {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse::<usize>().ok(),
        Some(_) => None,
    };
    match parsed {
        Some(n) if n > 0 => Ok(Some(n)),
        _ => Err(ServiceError::validation("limit must be a positive integer")),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::Storage(e.to_string()))
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
