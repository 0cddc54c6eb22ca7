// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::registry::OperationId;
use async_trait::async_trait;
use depot_core::{SequentialIdGen, SystemClock};
use depot_plugins::{FakeImporter, Importer, ImporterCall, PluginContext};
use depot_storage::Journal;
use serde_json::{json, Map};
use std::sync::atomic::{AtomicUsize, Ordering};

const WAIT: Duration = Duration::from_secs(5);

/// Runs a fake importer sync, recording the task id in the call config
#[derive(Clone)]
struct FakeSync {
    importer: FakeImporter,
}

#[async_trait]
impl OperationHandler for FakeSync {
    fn validate(&self, args: &CallArgs) -> Result<(), WorkError> {
        args.require_str("repo_id").map(|_| ())
    }

    async fn run(&self, ctx: TaskContext, args: CallArgs) -> Result<Value, WorkError> {
        let repo_id = args.require_str("repo_id")?;
        let mut config = Map::new();
        config.insert("task".to_string(), json!(ctx.task_id.0));
        let plugin_ctx = PluginContext::new(repo_id, "imp")
            .with_config(config)
            .with_cancel(ctx.cancel.clone());

        if args.get("then_publish").is_some() {
            ctx.dispatch_on_success(WorkRequest::new(
                OperationId::Publish,
                CallArgs::new().with("repo_id", repo_id),
            ));
        }
        Ok(self.importer.sync(&plugin_ctx).await?)
    }
}

struct Panics;

#[async_trait]
impl OperationHandler for Panics {
    async fn run(&self, _ctx: TaskContext, _args: CallArgs) -> Result<Value, WorkError> {
        panic!("handler blew up");
    }
}

struct Harness {
    dispatcher: Dispatcher<SystemClock, SequentialIdGen>,
    importer: FakeImporter,
}

fn harness(config: DispatcherConfig) -> Harness {
    let importer = FakeImporter::new();
    let handler = FakeSync {
        importer: importer.clone(),
    };
    let mut registry = OperationRegistry::new();
    registry.register(OperationId::Sync, handler.clone());
    registry.register(OperationId::Publish, handler);
    registry.register(OperationId::RepoDelete, Panics);

    let dispatcher = Dispatcher::new(
        TaskStore::new(Arc::new(Journal::in_memory())),
        registry,
        ReservationManager::new(),
        SystemClock,
        SequentialIdGen::new(),
        config,
    );
    Harness {
        dispatcher,
        importer,
    }
}

fn sync(repo_id: &str) -> WorkRequest {
    WorkRequest::new(OperationId::Sync, CallArgs::new().with("repo_id", repo_id))
}

/// Task ids in the order their importer calls began
fn call_order(importer: &FakeImporter) -> Vec<String> {
    importer
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ImporterCall::Sync { config, .. } => {
                config.get("task").and_then(Value::as_str).map(str::to_string)
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn dispatch_returns_handle_then_completes() {
    let h = harness(DispatcherConfig::default());
    let handle = h.dispatcher.dispatch(sync("zoo")).unwrap();
    assert_eq!(handle.state, TaskState::Waiting);
    assert_eq!(handle.tags, vec!["pulp:repository:zoo", "pulp:action:sync"]);

    let record = h.dispatcher.wait_for(&handle.task_id, WAIT).await.unwrap();
    assert_eq!(record.state, TaskState::Succeeded);
    assert_eq!(record.result.unwrap()["added_count"], 1);
    assert_eq!(record.resource_id.as_deref(), Some("repository:zoo"));
    assert!(record.start_time.is_some());
    assert!(record.finish_time >= record.start_time);
    assert_eq!(h.dispatcher.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_resource_runs_in_submission_order_without_overlap() {
    let h = harness(DispatcherConfig::default());
    h.importer.script().set_delay(Duration::from_millis(20));

    let ids: Vec<TaskId> = (0..4)
        .map(|_| h.dispatcher.dispatch(sync("zoo")).unwrap().task_id)
        .collect();
    assert!(h.dispatcher.wait_idle(WAIT).await);

    let expected: Vec<String> = ids.iter().map(|id| id.0.clone()).collect();
    assert_eq!(call_order(&h.importer), expected);

    let windows = h.importer.script().windows();
    assert_eq!(windows.len(), 4);
    for (i, a) in windows.iter().enumerate() {
        for b in &windows[i + 1..] {
            assert!(!a.overlaps(b), "runs on one repository overlapped");
        }
    }

    let records: Vec<TaskRecord> = ids
        .iter()
        .map(|id| h.dispatcher.get(id).unwrap())
        .collect();
    for pair in records.windows(2) {
        assert!(pair[0].finish_time <= pair[1].start_time);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_resources_run_concurrently() {
    let h = harness(DispatcherConfig::default());
    h.importer.script().hold();

    let a = h.dispatcher.dispatch(sync("zoo")).unwrap();
    let b = h.dispatcher.dispatch(sync("farm")).unwrap();
    assert!(h.importer.script().wait_entered(2, WAIT).await);
    assert_eq!(h.dispatcher.get(&a.task_id).unwrap().state, TaskState::Running);
    assert_eq!(h.dispatcher.get(&b.task_id).unwrap().state, TaskState::Running);

    h.importer.script().open();
    assert!(h.dispatcher.wait_idle(WAIT).await);

    let windows = h.importer.script().windows();
    assert!(windows[0].overlaps(&windows[1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_pool_bounds_concurrency() {
    let h = harness(DispatcherConfig {
        workers: 1,
        ..Default::default()
    });
    h.importer.script().set_delay(Duration::from_millis(10));

    for repo in ["a", "b", "c"] {
        h.dispatcher.dispatch(sync(repo)).unwrap();
    }
    assert!(h.dispatcher.wait_idle(WAIT).await);
    assert_eq!(h.importer.script().max_concurrency(), 1);
    assert_eq!(h.importer.calls().len(), 3);
}

#[tokio::test]
async fn handler_failure_is_recorded_with_cause() {
    let h = harness(DispatcherConfig::default());
    h.importer.script().fail_next("connection refused");

    let handle = h.dispatcher.dispatch(sync("zoo")).unwrap();
    let record = h.dispatcher.wait_for(&handle.task_id, WAIT).await.unwrap();

    assert_eq!(record.state, TaskState::Failed);
    let error = record.error.unwrap();
    assert_eq!(error.kind, "work_execution");
    let cause = error.cause.unwrap();
    assert_eq!(cause.kind, "plugin");
    assert!(cause.message.contains("connection refused"));
}

#[tokio::test]
async fn unregistered_operation_is_rejected() {
    let h = harness(DispatcherConfig::default());
    let request = WorkRequest::new(
        OperationId::ImportUpload,
        CallArgs::new().with("repo_id", "zoo"),
    );
    let handle = h.dispatcher.dispatch(request).unwrap();

    assert_eq!(handle.state, TaskState::Rejected);
    assert_eq!(handle.error.unwrap().kind, "validation");
    let stored = h.dispatcher.get(&handle.task_id).unwrap();
    assert_eq!(stored.state, TaskState::Rejected);
    assert!(stored.finish_time.is_some());
}

#[tokio::test]
async fn invalid_arguments_are_rejected_without_running() {
    let h = harness(DispatcherConfig::default());
    let handle = h
        .dispatcher
        .dispatch(WorkRequest::new(OperationId::Sync, CallArgs::new()))
        .unwrap();

    assert_eq!(handle.state, TaskState::Rejected);
    assert_eq!(handle.error.unwrap().kind, "validation");
    assert!(h.importer.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiting_task_cancels_immediately() {
    let h = harness(DispatcherConfig::default());
    h.importer.script().hold();

    let running = h.dispatcher.dispatch(sync("zoo")).unwrap();
    let waiting = h.dispatcher.dispatch(sync("zoo")).unwrap();
    let after = h.dispatcher.dispatch(sync("zoo")).unwrap();
    assert!(h.importer.script().wait_entered(1, WAIT).await);

    assert_eq!(
        h.dispatcher.cancel(&waiting.task_id).unwrap(),
        CancelOutcome::Canceled
    );
    assert_eq!(
        h.dispatcher.get(&waiting.task_id).unwrap().state,
        TaskState::Canceled
    );

    h.importer.script().open();
    assert!(h.dispatcher.wait_idle(WAIT).await);

    assert_eq!(
        h.dispatcher.get(&running.task_id).unwrap().state,
        TaskState::Succeeded
    );
    assert_eq!(
        h.dispatcher.get(&after.task_id).unwrap().state,
        TaskState::Succeeded
    );
    assert_eq!(
        call_order(&h.importer),
        vec![running.task_id.0.clone(), after.task_id.0.clone()]
    );
    assert_eq!(
        h.dispatcher.get(&waiting.task_id).unwrap().state,
        TaskState::Canceled
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn running_task_cancels_cooperatively() {
    let h = harness(DispatcherConfig::default());
    h.importer.script().hold();

    let handle = h.dispatcher.dispatch(sync("zoo")).unwrap();
    assert!(h.importer.script().wait_entered(1, WAIT).await);

    assert_eq!(
        h.dispatcher.cancel(&handle.task_id).unwrap(),
        CancelOutcome::Requested
    );
    let record = h.dispatcher.wait_for(&handle.task_id, WAIT).await.unwrap();
    assert_eq!(record.state, TaskState::Canceled);

    // The reservation was released
    h.importer.script().open();
    let next = h.dispatcher.dispatch(sync("zoo")).unwrap();
    let next = h.dispatcher.wait_for(&next.task_id, WAIT).await.unwrap();
    assert_eq!(next.state, TaskState::Succeeded);
}

#[tokio::test]
async fn cancel_finished_and_unknown_tasks() {
    let h = harness(DispatcherConfig::default());
    let handle = h.dispatcher.dispatch(sync("zoo")).unwrap();
    h.dispatcher.wait_for(&handle.task_id, WAIT).await.unwrap();

    assert_eq!(
        h.dispatcher.cancel(&handle.task_id).unwrap(),
        CancelOutcome::AlreadyFinished
    );
    assert_eq!(
        h.dispatcher.get(&handle.task_id).unwrap().state,
        TaskState::Succeeded
    );

    let err = h.dispatcher.cancel(&TaskId::from("nope")).unwrap_err();
    assert!(matches!(err, DispatchError::Store(e) if e.is_not_found()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reservation_wait_is_bounded() {
    let h = harness(DispatcherConfig {
        reservation_timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    h.importer.script().hold();

    let running = h.dispatcher.dispatch(sync("zoo")).unwrap();
    let starved = h.dispatcher.dispatch(sync("zoo")).unwrap();

    let record = h.dispatcher.wait_for(&starved.task_id, WAIT).await.unwrap();
    assert_eq!(record.state, TaskState::Rejected);
    assert_eq!(record.error.unwrap().kind, "reservation_timeout");

    h.importer.script().open();
    let record = h.dispatcher.wait_for(&running.task_id, WAIT).await.unwrap();
    assert_eq!(record.state, TaskState::Succeeded);
}

#[tokio::test]
async fn shutdown_rejects_new_work() {
    let h = harness(DispatcherConfig::default());
    h.dispatcher.shutdown();

    let handle = h.dispatcher.dispatch(sync("zoo")).unwrap();
    assert_eq!(handle.state, TaskState::Rejected);
    assert_eq!(handle.error.unwrap().kind, "reservation_failure");
    assert!(h.importer.calls().is_empty());
}

#[tokio::test]
async fn completion_hook_sees_terminal_record() {
    let h = harness(DispatcherConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let hook_seen = Arc::clone(&seen);
    let handle = h
        .dispatcher
        .dispatch_with_hook(
            sync("zoo"),
            Box::new(move |record| hook_seen.lock().unwrap().push(record.state)),
        )
        .unwrap();
    h.dispatcher.wait_for(&handle.task_id, WAIT).await.unwrap();

    let hook_seen = Arc::clone(&seen);
    h.dispatcher
        .dispatch_with_hook(
            WorkRequest::new(OperationId::Sync, CallArgs::new()),
            Box::new(move |record| hook_seen.lock().unwrap().push(record.state)),
        )
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![TaskState::Succeeded, TaskState::Rejected]
    );
}

#[tokio::test]
async fn hook_runs_once_per_task() {
    let h = harness(DispatcherConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let calls = Arc::clone(&calls);
        h.dispatcher
            .dispatch_with_hook(
                sync("zoo"),
                Box::new(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
    }
    assert!(h.dispatcher.wait_idle(WAIT).await);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn followups_dispatch_after_success() {
    let h = harness(DispatcherConfig::default());
    let request = WorkRequest::new(
        OperationId::Sync,
        CallArgs::new().with("repo_id", "zoo").with("then_publish", true),
    );
    let handle = h.dispatcher.dispatch(request).unwrap();
    let record = h.dispatcher.wait_for(&handle.task_id, WAIT).await.unwrap();

    let spawned = record.result.unwrap()["spawned_tasks"].clone();
    let spawned_id = TaskId::from(spawned[0].as_str().unwrap());
    let publish = h.dispatcher.wait_for(&spawned_id, WAIT).await.unwrap();
    assert_eq!(publish.operation, "publish");
    assert_eq!(publish.state, TaskState::Succeeded);
    assert!(publish.start_time >= record.finish_time);
}

#[tokio::test]
async fn panicking_handler_fails_task_and_releases_resource() {
    let h = harness(DispatcherConfig::default());
    let request = WorkRequest::new(
        OperationId::RepoDelete,
        CallArgs::new().with("repo_id", "zoo"),
    );
    let handle = h.dispatcher.dispatch(request).unwrap();
    let record = h.dispatcher.wait_for(&handle.task_id, WAIT).await.unwrap();

    assert_eq!(record.state, TaskState::Failed);
    assert_eq!(record.error.unwrap().kind, "worker_lost");

    let next = h.dispatcher.dispatch(sync("zoo")).unwrap();
    let next = h.dispatcher.wait_for(&next.task_id, WAIT).await.unwrap();
    assert_eq!(next.state, TaskState::Succeeded);
}
