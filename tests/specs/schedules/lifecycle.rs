//! Schedule CRUD specs
//!
//! Creating, reading back, updating and deleting schedules.

use crate::prelude::*;
use similar_asserts::assert_eq;

fn sync_owner() -> OwnerKey {
    OwnerKey::sync("zoo", "yum_importer")
}

#[test]
fn created_schedule_reads_back_with_defaults() {
    let depot = Depot::new();
    depot.create_repo("zoo");

    let created = depot
        .service
        .create_schedule(sync_owner(), every("P1DT"))
        .unwrap();
    let read = depot.service.get_schedule(&sync_owner(), &created.id).unwrap();
    assert_eq!(read, created);

    let value = serde_json::to_value(&read).unwrap();
    assert_eq!(value["schedule"], json!("P1DT"));
    assert!(value["_id"].is_string());
    assert_eq!(value["failure_threshold"], Value::Null);
    assert_eq!(value["enabled"], json!(true));
    assert_eq!(value["consecutive_failures"], json!(0));
    assert_eq!(value["remaining_runs"], Value::Null);
    assert_eq!(value["override_config"], json!({}));

    // Without a start time the first run is immediate
    assert_eq!(read.first_run, depot.clock.now());
    assert_eq!(read.next_run, Some(depot.clock.now()));
}

#[test]
fn malformed_interval_creates_nothing() {
    let depot = Depot::new();
    depot.create_repo("zoo");

    let err = depot
        .service
        .create_schedule(sync_owner(), every("not-an-interval"))
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(depot.service.list_schedules(&sync_owner()).unwrap().is_empty());
}

#[test]
fn schedule_needs_an_existing_owner() {
    let depot = Depot::new();
    depot.create_repo("zoo");

    let no_repo = depot
        .service
        .create_schedule(OwnerKey::sync("ghost", "yum_importer"), every("PT1H"))
        .unwrap_err();
    assert_eq!(no_repo.kind(), "not_found");

    let no_distributor = depot
        .service
        .create_schedule(OwnerKey::publish("zoo", "ftp"), every("PT1H"))
        .unwrap_err();
    assert_eq!(no_distributor.kind(), "not_found");
}

#[tokio::test]
async fn changing_the_interval_recomputes_next_run_from_last_run() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    let schedule = depot
        .service
        .create_schedule(sync_owner(), every("PT1H"))
        .unwrap();

    depot.tick().await;
    let last_run = depot.clock.now();
    depot.clock.advance(std::time::Duration::from_secs(600));

    let updated = depot
        .service
        .update_schedule(
            &sync_owner(),
            &schedule.id,
            ScheduleUpdate {
                schedule: Some("PT30M".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.last_run, Some(last_run));
    assert_eq!(
        updated.next_run,
        Some(last_run + chrono::Duration::minutes(30))
    );
}

#[test]
fn reenabling_resets_failures_and_reschedules_from_now() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    let schedule = depot
        .service
        .create_schedule(sync_owner(), every("PT1H"))
        .unwrap();

    let disabled = depot
        .service
        .update_schedule(
            &sync_owner(),
            &schedule.id,
            ScheduleUpdate {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(disabled.next_run, None);
    assert_eq!(disabled.state(), ScheduleState::Disabled);

    depot.clock.advance(std::time::Duration::from_secs(90 * 60));
    let enabled = depot
        .service
        .update_schedule(
            &sync_owner(),
            &schedule.id,
            ScheduleUpdate {
                enabled: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(enabled.consecutive_failures, 0);
    assert!(enabled.next_run.unwrap() >= depot.clock.now());
}

#[tokio::test]
async fn deleting_a_repository_deletes_its_schedules() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    depot
        .service
        .create_schedule(sync_owner(), every("PT1H"))
        .unwrap();
    depot
        .service
        .create_schedule(OwnerKey::publish("zoo", "web"), every("P1D"))
        .unwrap();

    let done = depot.run(json!({"op": "delete", "id": "zoo"})).await;
    assert_eq!(done.state, TaskState::Succeeded);

    // The owner is gone, and so are its schedules
    assert_eq!(
        depot.service.list_schedules(&sync_owner()).unwrap_err().kind(),
        "not_found"
    );
    depot.create_repo("zoo");
    assert!(depot.service.list_schedules(&sync_owner()).unwrap().is_empty());
}
