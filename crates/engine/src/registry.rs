// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed handler table for dispatchable operations

use crate::error::WorkError;
use async_trait::async_trait;
use depot_core::{tags, CancelToken, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Every operation the dispatcher knows how to run
///
/// Repository creation is not here: it completes synchronously in the
/// command surface and never becomes a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationId {
    RepoDelete,
    RepoUpdate,
    ImporterAdd,
    ImporterRemove,
    ImporterUpdate,
    DistributorAdd,
    DistributorRemove,
    DistributorUpdate,
    Sync,
    Publish,
    ResolveDependencies,
    RegenerateApplicability,
    ImportUpload,
    Associate,
}

impl OperationId {
    pub const ALL: [OperationId; 14] = [
        OperationId::RepoDelete,
        OperationId::RepoUpdate,
        OperationId::ImporterAdd,
        OperationId::ImporterRemove,
        OperationId::ImporterUpdate,
        OperationId::DistributorAdd,
        OperationId::DistributorRemove,
        OperationId::DistributorUpdate,
        OperationId::Sync,
        OperationId::Publish,
        OperationId::ResolveDependencies,
        OperationId::RegenerateApplicability,
        OperationId::ImportUpload,
        OperationId::Associate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationId::RepoDelete => "repo_delete",
            OperationId::RepoUpdate => "repo_update",
            OperationId::ImporterAdd => "importer_add",
            OperationId::ImporterRemove => "importer_remove",
            OperationId::ImporterUpdate => "importer_update",
            OperationId::DistributorAdd => "distributor_add",
            OperationId::DistributorRemove => "distributor_remove",
            OperationId::DistributorUpdate => "distributor_update",
            OperationId::Sync => "sync",
            OperationId::Publish => "publish",
            OperationId::ResolveDependencies => "resolve_dependencies",
            OperationId::RegenerateApplicability => "regenerate_applicability",
            OperationId::ImportUpload => "import_upload",
            OperationId::Associate => "associate",
        }
    }

    /// Action tag recorded on dispatched tasks
    fn action(&self) -> &'static str {
        match self {
            OperationId::RepoDelete => tags::ACTION_DELETE,
            OperationId::RepoUpdate => tags::ACTION_UPDATE,
            OperationId::ImporterAdd => tags::ACTION_ADD_IMPORTER,
            OperationId::ImporterRemove => tags::ACTION_DELETE_IMPORTER,
            OperationId::ImporterUpdate => tags::ACTION_UPDATE_IMPORTER,
            OperationId::DistributorAdd => tags::ACTION_ADD_DISTRIBUTOR,
            OperationId::DistributorRemove => tags::ACTION_REMOVE_DISTRIBUTOR,
            OperationId::DistributorUpdate => tags::ACTION_UPDATE_DISTRIBUTOR,
            OperationId::Sync => tags::ACTION_SYNC,
            OperationId::Publish => tags::ACTION_PUBLISH,
            OperationId::ResolveDependencies => tags::ACTION_RESOLVE_DEPENDENCIES,
            OperationId::RegenerateApplicability => tags::ACTION_APPLICABILITY,
            OperationId::ImportUpload => tags::ACTION_IMPORT_UPLOAD,
            OperationId::Associate => tags::ACTION_ASSOCIATE,
        }
    }

    /// Reservation key for a call: the repository it touches, if any
    pub fn resource_id(&self, args: &CallArgs) -> Option<String> {
        match self {
            OperationId::RegenerateApplicability => None,
            _ => args.repo_id().map(tags::repository_resource),
        }
    }

    /// Tags describing a call of this operation
    pub fn tags(&self, args: &CallArgs) -> Vec<String> {
        let mut out = Vec::new();
        if *self != OperationId::RegenerateApplicability {
            if let Some(repo_id) = args.repo_id() {
                out.push(tags::repository_tag(repo_id));
            }
        }
        match self {
            OperationId::ImporterAdd | OperationId::ImporterRemove | OperationId::ImporterUpdate => {
                if let Some(importer_id) = args
                    .str("importer_id")
                    .or_else(|| args.str("importer_type_id"))
                {
                    out.push(tags::importer_tag(importer_id));
                }
            }
            OperationId::DistributorAdd
            | OperationId::DistributorRemove
            | OperationId::DistributorUpdate
            | OperationId::Publish => {
                if let Some(distributor_id) = args
                    .str("distributor_id")
                    .or_else(|| args.str("distributor_type_id"))
                {
                    out.push(tags::distributor_tag(distributor_id));
                }
            }
            OperationId::Associate => {
                if let Some(source) = args.str("source_repo_id") {
                    out.push(tags::repository_tag(source));
                }
            }
            _ => {}
        }
        out.push(tags::action_tag(self.action()));
        out
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationId::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown operation: {s}"))
    }
}

/// Arguments of a dispatched call
///
/// Handlers read named arguments from `kwargs`. The repository id may also
/// be passed as the first positional argument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key).filter(|v| !v.is_null())
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.get(key).and_then(Value::as_object)
    }

    pub fn repo_id(&self) -> Option<&str> {
        self.str("repo_id")
            .or_else(|| self.args.first().and_then(Value::as_str))
    }

    pub fn require_str(&self, key: &str) -> Result<&str, WorkError> {
        if key == "repo_id" {
            return self
                .repo_id()
                .ok_or_else(|| WorkError::validation("missing required argument: repo_id"));
        }
        self.str(key)
            .ok_or_else(|| WorkError::validation(format!("missing required argument: {key}")))
    }

    /// Object argument, empty when absent; any other type is rejected
    pub fn object_or_empty(&self, key: &str) -> Result<Map<String, Value>, WorkError> {
        match self.get(key) {
            None => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(WorkError::validation(format!("{key} must be an object"))),
        }
    }
}

impl From<depot_core::CallSpec> for CallArgs {
    fn from(call: depot_core::CallSpec) -> Self {
        Self {
            args: call.args,
            kwargs: call.kwargs,
        }
    }
}

/// Follow-up work queued by a running handler
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub operation: OperationId,
    pub args: CallArgs,
    pub resource_id: Option<String>,
    pub tags: Vec<String>,
}

impl WorkRequest {
    /// Request with the reservation key and tags the operation implies
    pub fn new(operation: OperationId, args: CallArgs) -> Self {
        Self {
            resource_id: operation.resource_id(&args),
            tags: operation.tags(&args),
            operation,
            args,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// What a handler sees while running on a worker
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub cancel: CancelToken,
    followups: Arc<Mutex<Vec<WorkRequest>>>,
}

impl TaskContext {
    pub fn new(task_id: TaskId, cancel: CancelToken) -> Self {
        Self {
            task_id,
            cancel,
            followups: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Dispatch `request` once this task succeeds
    pub fn dispatch_on_success(&self, request: WorkRequest) {
        self.followups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
    }

    pub fn check_canceled(&self) -> Result<(), WorkError> {
        if self.cancel.is_canceled() {
            Err(WorkError::Canceled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn take_followups(&self) -> Vec<WorkRequest> {
        std::mem::take(&mut *self.followups.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// A dispatchable operation
#[async_trait]
pub trait OperationHandler: Send + Sync + 'static {
    /// Cheap argument check run synchronously at dispatch time
    fn validate(&self, _args: &CallArgs) -> Result<(), WorkError> {
        Ok(())
    }

    async fn run(&self, ctx: TaskContext, args: CallArgs) -> Result<Value, WorkError>;
}

/// Operation id to handler, filled once at startup
#[derive(Clone, Default)]
pub struct OperationRegistry {
    handlers: HashMap<OperationId, Arc<dyn OperationHandler>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, operation: OperationId, handler: impl OperationHandler) {
        self.handlers.insert(operation, Arc::new(handler));
    }

    pub fn get(&self, operation: OperationId) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(&operation).cloned()
    }

    pub fn contains(&self, operation: OperationId) -> bool {
        self.handlers.contains_key(&operation)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
