//! Shared harness for the behavioral specs.

use std::sync::Arc;
use std::time::Duration;

pub use depot_core::{Clock, FakeClock, OwnerKey, ScheduleState, ScheduleUpdate, TaskState};
pub use depot_engine::{CallOutcome, CancelOutcome, RepoCommand, ScheduleRequest, ServiceError};
pub use depot_plugins::{FakeDistributor, FakeImporter};
pub use depot_storage::TaskFilter;
pub use serde_json::{json, Value};

use depot_core::{SequentialIdGen, TaskResult};
use depot_engine::{
    Dispatcher, DispatcherConfig, OperationRegistry, RepositoryOps, RepositoryService,
    ReservationManager, RunnerConfig, ScheduleRunner,
};
use depot_plugins::PluginRegistry;
use depot_storage::{HistoryStore, Journal, RepositoryStore, ScheduleStore, TaskStore};

pub const WAIT: Duration = Duration::from_secs(5);
pub const HOUR: Duration = Duration::from_secs(3600);

/// The engine wired together the way the daemon does it
pub struct Depot {
    pub service: RepositoryService<FakeClock, SequentialIdGen>,
    pub runner: ScheduleRunner<FakeClock, SequentialIdGen>,
    pub importer: FakeImporter,
    pub distributor: FakeDistributor,
    pub clock: FakeClock,
}

impl Depot {
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        let journal = Arc::new(Journal::in_memory());
        let repos = RepositoryStore::new(Arc::clone(&journal));
        let schedules = ScheduleStore::new(Arc::clone(&journal));
        let importer = FakeImporter::new();
        let distributor = FakeDistributor::new();
        let mut plugins = PluginRegistry::new();
        plugins.register_importer("yum_importer", importer.clone());
        plugins.register_distributor("yum_distributor", distributor.clone());
        let clock = FakeClock::new();
        let ids = SequentialIdGen::new();

        let ops = Arc::new(RepositoryOps::new(
            repos.clone(),
            schedules.clone(),
            HistoryStore::new(Arc::clone(&journal)),
            Arc::new(plugins),
            clock.clone(),
        ));
        let mut registry = OperationRegistry::new();
        ops.register(&mut registry);
        let dispatcher = Dispatcher::new(
            TaskStore::new(journal),
            registry,
            ReservationManager::new(),
            clock.clone(),
            ids.clone(),
            config,
        );
        let runner = ScheduleRunner::new(
            schedules.clone(),
            dispatcher.clone(),
            clock.clone(),
            RunnerConfig::default(),
        );
        let service = RepositoryService::new(ops, dispatcher, repos, schedules, clock.clone(), ids);

        Self {
            service,
            runner,
            importer,
            distributor,
            clock,
        }
    }

    pub fn try_call(&self, command: Value) -> Result<CallOutcome, ServiceError> {
        let command: RepoCommand = serde_json::from_value(command).unwrap();
        self.service.execute(command)
    }

    pub fn call(&self, command: Value) -> CallOutcome {
        self.try_call(command).unwrap()
    }

    /// Dispatch `command` and return its handle
    pub fn accept(&self, command: Value) -> TaskResult {
        match self.call(command) {
            CallOutcome::Accepted(task) => task,
            CallOutcome::Completed(value) => panic!("expected a task, completed with {value}"),
        }
    }

    /// Dispatch `command` and wait for it to finish
    pub async fn run(&self, command: Value) -> TaskResult {
        let task = self.accept(command);
        self.finish(&task).await
    }

    pub async fn finish(&self, task: &TaskResult) -> TaskResult {
        self.service
            .dispatcher()
            .wait_for(&task.task_id, WAIT)
            .await
            .unwrap()
            .to_result()
    }

    /// A repository `<id>` with importer `yum_importer` and distributor `web`
    pub fn create_repo(&self, id: &str) {
        self.call(json!({
            "op": "create",
            "id": id,
            "importer_type_id": "yum_importer",
            "importer_config": {"feed": format!("http://example.com/{id}")},
            "distributors": [{
                "distributor_type_id": "yum_distributor",
                "distributor_id": "web",
            }],
        }));
    }

    pub fn get_repo(&self, id: &str) -> Value {
        match self.call(json!({"op": "get", "id": id})) {
            CallOutcome::Completed(value) => value,
            CallOutcome::Accepted(task) => panic!("get dispatched a task: {task:?}"),
        }
    }

    /// One runner tick, waiting for every dispatched task to finish
    pub async fn tick(&self) -> Vec<TaskResult> {
        let mut finished = Vec::new();
        for task in self.runner.run_once() {
            finished.push(self.finish(&task).await);
        }
        finished
    }
}

pub fn every(interval: &str) -> ScheduleRequest {
    ScheduleRequest {
        schedule: Some(interval.to_string()),
        ..Default::default()
    }
}
