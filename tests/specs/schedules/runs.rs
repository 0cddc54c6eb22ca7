//! Schedule run specs
//!
//! What the runner does with due schedules, and how each run's outcome
//! feeds back into the schedule.

use crate::prelude::*;
use similar_asserts::assert_eq;

fn sync_owner() -> OwnerKey {
    OwnerKey::sync("zoo", "yum_importer")
}

fn schedule(depot: &Depot, request: ScheduleRequest) -> depot_core::Schedule {
    depot.service.create_schedule(sync_owner(), request).unwrap()
}

#[tokio::test]
async fn failing_schedule_disables_itself_at_the_threshold() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    let created = schedule(
        &depot,
        ScheduleRequest {
            failure_threshold: Some(2),
            ..every("PT1H")
        },
    );
    depot.importer.script().fail_always("feed unreachable");

    assert_eq!(depot.tick().await[0].state, TaskState::Failed);
    depot.clock.advance(HOUR);
    assert_eq!(depot.tick().await[0].state, TaskState::Failed);

    let read = depot.service.get_schedule(&sync_owner(), &created.id).unwrap();
    assert_eq!(read.state(), ScheduleState::Disabled);
    assert_eq!(read.consecutive_failures, 2);

    // Nothing further is dispatched once disabled
    depot.clock.advance(HOUR);
    assert!(depot.tick().await.is_empty());
    assert_eq!(depot.importer.calls().len(), 2);
}

#[tokio::test]
async fn success_resets_the_failure_count() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    let created = schedule(
        &depot,
        ScheduleRequest {
            failure_threshold: Some(3),
            ..every("PT1H")
        },
    );

    depot.importer.script().fail_next("timeout");
    depot.importer.script().fail_next("timeout");
    depot.tick().await;
    depot.clock.advance(HOUR);
    depot.tick().await;
    assert_eq!(
        depot
            .service
            .get_schedule(&sync_owner(), &created.id)
            .unwrap()
            .consecutive_failures,
        2
    );

    depot.clock.advance(HOUR);
    assert_eq!(depot.tick().await[0].state, TaskState::Succeeded);
    let read = depot.service.get_schedule(&sync_owner(), &created.id).unwrap();
    assert_eq!(read.consecutive_failures, 0);
    assert_eq!(read.state(), ScheduleState::Active);
}

#[tokio::test]
async fn manual_calls_do_not_touch_schedule_bookkeeping() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    let created = schedule(&depot, every("PT1H"));
    depot.importer.script().fail_next("manual run failed");

    let done = depot.run(json!({"op": "sync", "repo_id": "zoo"})).await;
    assert_eq!(done.state, TaskState::Failed);

    let read = depot.service.get_schedule(&sync_owner(), &created.id).unwrap();
    assert_eq!(read.consecutive_failures, 0);
    assert_eq!(read.last_run, None);
}

#[tokio::test]
async fn scheduled_runs_are_tagged_with_their_schedule() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    let created = schedule(&depot, every("PT1H"));

    let finished = depot.tick().await;
    assert_eq!(finished.len(), 1);

    let tag = format!("pulp:schedule:{}", created.id);
    let tagged = depot.service.tasks(&TaskFilter {
        tag: Some(tag),
        ..Default::default()
    });
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].task_id, finished[0].task_id);
    assert!(tagged[0].tags.contains(&"pulp:action:sync".to_string()));
}

#[tokio::test]
async fn publish_schedule_publishes_with_its_overrides() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    depot
        .service
        .create_schedule(
            OwnerKey::publish("zoo", "web"),
            ScheduleRequest {
                override_config: json!({"skip_fast_forward": true}).as_object().cloned(),
                ..every("P1D")
            },
        )
        .unwrap();

    let finished = depot.tick().await;
    assert_eq!(finished[0].state, TaskState::Succeeded);

    let calls = depot.distributor.calls();
    assert_eq!(calls.len(), 1);
    let depot_plugins::DistributorCall::Publish {
        distributor_id,
        config,
        ..
    } = &calls[0];
    assert_eq!(distributor_id, "web");
    assert_eq!(config["skip_fast_forward"], json!(true));
}

#[tokio::test]
async fn deleting_a_schedule_leaves_its_running_task_alone() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    let created = schedule(&depot, every("PT1H"));
    depot.importer.script().hold();

    let dispatched = depot.runner.run_once();
    assert!(depot.importer.script().wait_entered(1, WAIT).await);
    depot
        .service
        .delete_schedule(&sync_owner(), &created.id)
        .unwrap();
    assert_eq!(
        depot.service.task(&dispatched[0].task_id).unwrap().state,
        TaskState::Running
    );

    depot.importer.script().open();
    assert_eq!(depot.finish(&dispatched[0]).await.state, TaskState::Succeeded);
    assert_eq!(
        depot
            .service
            .get_schedule(&sync_owner(), &created.id)
            .unwrap_err()
            .kind(),
        "not_found"
    );
}

#[tokio::test]
async fn recurrence_limit_exhausts_the_schedule() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    let created = schedule(&depot, every("R2/PT1H"));
    assert_eq!(created.remaining_runs, Some(2));

    assert_eq!(depot.tick().await.len(), 1);
    depot.clock.advance(HOUR);
    assert_eq!(depot.tick().await.len(), 1);

    let read = depot.service.get_schedule(&sync_owner(), &created.id).unwrap();
    assert_eq!(read.state(), ScheduleState::Exhausted);
    assert_eq!(read.remaining_runs, Some(0));

    depot.clock.advance(HOUR * 24);
    assert!(depot.tick().await.is_empty());
}

#[tokio::test]
async fn missed_occurrences_collapse_into_one_run() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    schedule(&depot, every("PT1H"));

    depot.tick().await;
    depot.clock.advance(HOUR * 5);
    assert_eq!(depot.tick().await.len(), 1);
    assert!(depot.tick().await.is_empty());
    assert_eq!(depot.importer.calls().len(), 2);
}
