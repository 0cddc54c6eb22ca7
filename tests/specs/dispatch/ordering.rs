//! Reservation ordering specs
//!
//! Work on one repository runs one at a time in dispatch order; work on
//! different repositories runs side by side.

use crate::prelude::*;
use similar_asserts::assert_eq;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_repository_runs_serially_in_dispatch_order() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    depot.importer.script().set_delay(std::time::Duration::from_millis(20));

    let tasks: Vec<_> = (0..5)
        .map(|n| {
            depot.accept(json!({
                "op": "sync",
                "repo_id": "zoo",
                "override_config": {"run": n},
            }))
        })
        .collect();
    for task in &tasks {
        assert_eq!(depot.finish(task).await.state, TaskState::Succeeded);
    }

    let windows = depot.importer.script().windows();
    assert_eq!(windows.len(), 5);
    for pair in windows.windows(2) {
        assert!(!pair[0].overlaps(&pair[1]));
        assert!(pair[0].finished <= pair[1].started);
    }
    let order: Vec<_> = depot
        .importer
        .calls()
        .into_iter()
        .map(|call| match call {
            depot_plugins::ImporterCall::Sync { config, .. } => config["run"].clone(),
            other => panic!("unexpected call {other:?}"),
        })
        .collect();
    assert_eq!(order, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
    assert_eq!(depot.importer.script().max_concurrency(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_repositories_run_concurrently() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    depot.create_repo("farm");
    depot.importer.script().hold();

    let zoo = depot.accept(json!({"op": "sync", "repo_id": "zoo"}));
    let farm = depot.accept(json!({"op": "sync", "repo_id": "farm"}));

    // Both are inside the importer at once
    assert!(depot.importer.script().wait_entered(2, WAIT).await);
    depot.importer.script().open();

    assert_eq!(depot.finish(&zoo).await.state, TaskState::Succeeded);
    assert_eq!(depot.finish(&farm).await.state, TaskState::Succeeded);
    assert_eq!(depot.importer.script().max_concurrency(), 2);
}

#[tokio::test]
async fn queued_work_waits_for_the_running_task() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    depot.importer.script().hold();

    let first = depot.accept(json!({"op": "sync", "repo_id": "zoo"}));
    let second = depot.accept(json!({"op": "publish", "repo_id": "zoo", "distributor_id": "web"}));
    assert!(depot.importer.script().wait_entered(1, WAIT).await);

    let pending = depot.service.task(&second.task_id).unwrap();
    assert_eq!(pending.state, TaskState::Waiting);
    assert!(depot.distributor.calls().is_empty());

    depot.importer.script().open();
    assert_eq!(depot.finish(&first).await.state, TaskState::Succeeded);
    assert_eq!(depot.finish(&second).await.state, TaskState::Succeeded);
    assert_eq!(depot.distributor.calls().len(), 1);
}
