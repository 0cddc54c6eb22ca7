//! Task outcome specs
//!
//! Every dispatch ends in exactly one terminal state, which never changes.

use crate::prelude::*;
use similar_asserts::assert_eq;
use depot_engine::DispatcherConfig;
use std::time::Duration;

#[tokio::test]
async fn terminal_state_is_final() {
    let depot = Depot::new();
    depot.create_repo("zoo");

    let done = depot.run(json!({"op": "sync", "repo_id": "zoo"})).await;
    assert_eq!(done.state, TaskState::Succeeded);

    assert_eq!(
        depot.service.cancel_task(&done.task_id).unwrap(),
        CancelOutcome::AlreadyFinished
    );
    assert_eq!(depot.service.task(&done.task_id).unwrap(), done);
}

#[tokio::test]
async fn plugin_failure_is_recorded_with_cause() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    depot.importer.script().fail_next("feed returned 503");

    let done = depot.run(json!({"op": "sync", "repo_id": "zoo"})).await;
    assert_eq!(done.state, TaskState::Failed);

    let error = done.error.unwrap();
    assert_eq!(error.kind, "work_execution");
    let cause = error.cause.unwrap();
    assert_eq!(cause.kind, "plugin");
    assert!(cause.message.contains("feed returned 503"));
}

#[tokio::test]
async fn missing_repository_fails_asynchronously() {
    let depot = Depot::new();

    let done = depot.run(json!({"op": "sync", "repo_id": "ghost"})).await;
    assert_eq!(done.state, TaskState::Failed);
    assert_eq!(done.error.unwrap().kind, "not_found");
}

#[tokio::test]
async fn waiting_task_cancels_immediately() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    depot.importer.script().hold();

    let running = depot.accept(json!({"op": "sync", "repo_id": "zoo"}));
    let queued = depot.accept(json!({"op": "sync", "repo_id": "zoo"}));
    assert!(depot.importer.script().wait_entered(1, WAIT).await);

    assert_eq!(
        depot.service.cancel_task(&queued.task_id).unwrap(),
        CancelOutcome::Canceled
    );
    assert_eq!(depot.finish(&queued).await.state, TaskState::Canceled);

    assert_eq!(
        depot.service.cancel_task(&running.task_id).unwrap(),
        CancelOutcome::Requested
    );
    assert_eq!(depot.finish(&running).await.state, TaskState::Canceled);
    assert_eq!(depot.importer.calls().len(), 1);
}

#[tokio::test]
async fn reservation_timeout_rejects_the_waiting_task() {
    let depot = Depot::with_config(DispatcherConfig {
        workers: 4,
        reservation_timeout: Some(Duration::from_millis(50)),
    });
    depot.create_repo("zoo");
    depot.importer.script().hold();

    let running = depot.accept(json!({"op": "sync", "repo_id": "zoo"}));
    let starved = depot.accept(json!({"op": "sync", "repo_id": "zoo"}));

    let rejected = depot.finish(&starved).await;
    assert_eq!(rejected.state, TaskState::Rejected);
    assert_eq!(rejected.error.unwrap().kind, "reservation_timeout");

    depot.importer.script().open();
    assert_eq!(depot.finish(&running).await.state, TaskState::Succeeded);
}

#[tokio::test]
async fn tasks_can_be_listed_by_tag() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    depot.create_repo("farm");

    depot.run(json!({"op": "sync", "repo_id": "zoo"})).await;
    depot.run(json!({"op": "sync", "repo_id": "farm"})).await;
    depot
        .run(json!({"op": "publish", "repo_id": "zoo", "distributor_id": "web"}))
        .await;

    let zoo = depot.service.tasks(&TaskFilter {
        tag: Some("pulp:repository:zoo".to_string()),
        ..Default::default()
    });
    assert_eq!(zoo.len(), 2);

    let publishes = depot.service.tasks(&TaskFilter {
        tag: Some("pulp:action:publish".to_string()),
        ..Default::default()
    });
    assert_eq!(publishes.len(), 1);
    assert_eq!(
        publishes[0].tags,
        vec![
            "pulp:repository:zoo".to_string(),
            "pulp:repository_distributor:web".to_string(),
            "pulp:action:publish".to_string(),
        ]
    );
}
