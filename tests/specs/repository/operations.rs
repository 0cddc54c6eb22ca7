//! Repository operation specs
//!
//! Catalog changes and plugin work as seen through the command surface.

use crate::prelude::*;
use similar_asserts::assert_eq;

#[tokio::test]
async fn sync_queues_publish_for_auto_publish_distributors() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    let added = depot
        .run(json!({
            "op": "add_distributor",
            "repo_id": "zoo",
            "distributor_type_id": "yum_distributor",
            "distributor_id": "mirror",
            "auto_publish": true,
        }))
        .await;
    assert_eq!(added.state, TaskState::Succeeded);

    let synced = depot.run(json!({"op": "sync", "repo_id": "zoo"})).await;
    assert_eq!(synced.state, TaskState::Succeeded);
    let spawned = synced.result.unwrap()["spawned_tasks"].clone();
    assert_eq!(spawned.as_array().map(Vec::len), Some(1));

    assert!(depot.service.dispatcher().wait_idle(WAIT).await);
    let calls = depot.distributor.calls();
    assert_eq!(calls.len(), 1);
    let depot_plugins::DistributorCall::Publish { distributor_id, .. } = &calls[0];
    assert_eq!(distributor_id, "mirror");

    let repo = depot.get_repo("zoo");
    assert!(repo["last_sync"].is_string());
    assert!(repo["last_publish"].is_string());
}

#[tokio::test]
async fn failed_sync_publishes_nothing() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    depot
        .run(json!({
            "op": "update_distributor",
            "repo_id": "zoo",
            "distributor_id": "web",
            "distributor_config": {},
            "auto_publish": true,
        }))
        .await;
    depot.importer.script().fail_next("checksum mismatch");

    let synced = depot.run(json!({"op": "sync", "repo_id": "zoo"})).await;
    assert_eq!(synced.state, TaskState::Failed);
    assert!(depot.service.dispatcher().wait_idle(WAIT).await);
    assert!(depot.distributor.calls().is_empty());
    assert_eq!(depot.get_repo("zoo")["last_sync"], Value::Null);
}

#[tokio::test]
async fn removing_the_importer_removes_its_schedules() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    let owner = OwnerKey::sync("zoo", "yum_importer");
    depot
        .service
        .create_schedule(owner.clone(), every("PT6H"))
        .unwrap();
    let publish = depot
        .service
        .create_schedule(OwnerKey::publish("zoo", "web"), every("P1D"))
        .unwrap();

    let removed = depot
        .run(json!({
            "op": "remove_importer",
            "repo_id": "zoo",
            "importer_id": "yum_importer",
        }))
        .await;
    assert_eq!(removed.state, TaskState::Succeeded);
    assert_eq!(depot.get_repo("zoo")["importer"], Value::Null);

    // Publish schedules are untouched
    let remaining: Vec<_> = depot
        .service
        .list_schedules(&OwnerKey::publish("zoo", "web"))
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(remaining, vec![publish.id]);
    assert_eq!(
        depot.service.list_schedules(&owner).unwrap_err().kind(),
        "not_found"
    );
}

#[tokio::test]
async fn importer_config_update_merges_and_removes_nulls() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    depot
        .run(json!({
            "op": "update_importer",
            "repo_id": "zoo",
            "importer_id": "yum_importer",
            "importer_config": {"num_threads": 4},
        }))
        .await;
    let updated = depot
        .run(json!({
            "op": "update_importer",
            "repo_id": "zoo",
            "importer_id": "yum_importer",
            "importer_config": {"feed": null},
        }))
        .await;
    assert_eq!(updated.state, TaskState::Succeeded);

    assert_eq!(
        depot.get_repo("zoo")["importer"]["config"],
        json!({"num_threads": 4})
    );
}

#[tokio::test]
async fn sync_uses_stored_config_under_call_overrides() {
    let depot = Depot::new();
    depot.create_repo("zoo");

    depot
        .run(json!({
            "op": "sync",
            "repo_id": "zoo",
            "override_config": {"feed": "http://mirror.example.com/zoo", "validate": true},
        }))
        .await;
    depot.run(json!({"op": "sync", "repo_id": "zoo"})).await;

    let configs: Vec<_> = depot
        .importer
        .calls()
        .into_iter()
        .map(|call| match call {
            depot_plugins::ImporterCall::Sync { config, .. } => Value::Object(config),
            other => panic!("unexpected call {other:?}"),
        })
        .collect();
    assert_eq!(
        configs,
        vec![
            json!({"feed": "http://mirror.example.com/zoo", "validate": true}),
            json!({"feed": "http://example.com/zoo"}),
        ]
    );
}

#[tokio::test]
async fn upload_is_imported_through_the_importer() {
    let depot = Depot::new();
    depot.create_repo("zoo");

    let done = depot
        .run(json!({
            "op": "import_upload",
            "repo_id": "zoo",
            "upload_id": "up-1",
            "unit_type_id": "rpm",
            "unit_key": {"name": "walrus", "version": "5.21"},
        }))
        .await;
    assert_eq!(done.state, TaskState::Succeeded);
    assert_eq!(
        done.result.unwrap()["unit_key"],
        json!({"name": "walrus", "version": "5.21"})
    );
    assert_eq!(
        depot.importer.calls(),
        vec![depot_plugins::ImporterCall::ImportUpload {
            repo_id: "zoo".to_string(),
            upload_id: "up-1".to_string(),
        }]
    );
}

#[test]
fn upload_without_unit_key_is_refused() {
    let depot = Depot::new();
    depot.create_repo("zoo");

    let err = depot
        .try_call(json!({
            "op": "import_upload",
            "repo_id": "zoo",
            "upload_id": "up-1",
            "unit_type_id": "rpm",
        }))
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(depot.service.tasks(&TaskFilter::default()).is_empty());
}

#[tokio::test]
async fn dependencies_are_resolved_by_the_importer() {
    let depot = Depot::new();
    depot.create_repo("zoo");

    let done = depot
        .run(json!({
            "op": "resolve_dependencies",
            "repo_id": "zoo",
            "units": [{"name": "walrus"}, {"name": "penguin"}],
            "options": {"recursive": true},
        }))
        .await;
    assert_eq!(done.state, TaskState::Succeeded);
    assert_eq!(
        depot.importer.calls(),
        vec![depot_plugins::ImporterCall::ResolveDependencies {
            repo_id: "zoo".to_string(),
            units: 2,
        }]
    );
}

#[tokio::test]
async fn applicability_regeneration_reports_matching_repositories() {
    let depot = Depot::new();
    for id in ["farm", "zoo", "zoo-updates"] {
        depot.create_repo(id);
    }

    let all = depot
        .run(json!({"op": "regenerate_applicability", "repo_criteria": {}}))
        .await;
    assert_eq!(
        all.result.unwrap(),
        json!({"repo_ids": ["farm", "zoo", "zoo-updates"]})
    );

    let some = depot
        .run(json!({
            "op": "regenerate_applicability",
            "repo_criteria": {"filters": {"id": {"$in": ["zoo", "ghost"]}}},
        }))
        .await;
    assert_eq!(some.result.unwrap(), json!({"repo_ids": ["zoo"]}));
}

#[tokio::test]
async fn repository_update_changes_descriptive_fields() {
    let depot = Depot::new();
    depot.create_repo("zoo");

    let done = depot
        .run(json!({
            "op": "update",
            "id": "zoo",
            "delta": {"display_name": "Zoo", "notes": {"team": "mammals"}},
        }))
        .await;
    assert_eq!(done.state, TaskState::Succeeded);

    let repo = depot.get_repo("zoo");
    assert_eq!(repo["display_name"], json!("Zoo"));
    assert_eq!(repo["notes"], json!({"team": "mammals"}));
}

#[test]
fn listing_returns_every_repository() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    depot.create_repo("farm");

    let CallOutcome::Completed(listed) = depot.call(json!({"op": "list"})) else {
        panic!("list dispatched a task");
    };
    let ids: Vec<_> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|repo| repo["id"].clone())
        .collect();
    assert_eq!(ids, vec![json!("farm"), json!("zoo")]);
}

#[tokio::test]
async fn sync_and_publish_history_follow_each_run() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    depot.importer.script().fail_next("feed unreachable");

    let failed = depot.run(json!({"op": "sync", "repo_id": "zoo"})).await;
    assert_eq!(failed.state, TaskState::Failed);
    let published = depot
        .run(json!({"op": "publish", "repo_id": "zoo", "distributor_id": "web"}))
        .await;
    assert_eq!(published.state, TaskState::Succeeded);

    let CallOutcome::Completed(syncs) =
        depot.call(json!({"op": "sync_history", "repo_id": "zoo"}))
    else {
        panic!("history is answered inline");
    };
    assert_eq!(syncs[0]["task_id"], json!(failed.task_id));
    assert_eq!(syncs[0]["result"], "failed");
    assert!(syncs[0]["error_message"]
        .as_str()
        .unwrap()
        .contains("feed unreachable"));

    let CallOutcome::Completed(publishes) = depot.call(json!({
        "op": "publish_history",
        "repo_id": "zoo",
        "distributor_id": "web",
    })) else {
        panic!("history is answered inline");
    };
    assert_eq!(publishes.as_array().map(Vec::len), Some(1));
    assert_eq!(publishes[0]["result"], "success");

    // Deleting the repository takes its history with it
    depot.run(json!({"op": "delete", "id": "zoo"})).await;
    depot.create_repo("zoo");
    let CallOutcome::Completed(syncs) =
        depot.call(json!({"op": "sync_history", "repo_id": "zoo"}))
    else {
        panic!("history is answered inline");
    };
    assert_eq!(syncs, json!([]));
}

#[tokio::test]
async fn associate_copies_units_between_repositories() {
    let depot = Depot::new();
    depot.create_repo("zoo");
    depot.create_repo("zoo-testing");

    let done = depot
        .run(json!({
            "op": "associate",
            "repo_id": "zoo-testing",
            "source_repo_id": "zoo",
            "criteria": {"type_ids": ["rpm"], "filters": {"unit": {"name": "walrus"}}},
        }))
        .await;
    assert_eq!(done.state, TaskState::Succeeded);
    assert_eq!(
        depot.importer.calls(),
        vec![depot_plugins::ImporterCall::ImportUnits {
            repo_id: "zoo-testing".to_string(),
            source_repo_id: "zoo".to_string(),
            criteria: json!({"type_ids": ["rpm"], "filters": {"unit": {"name": "walrus"}}})
                .as_object()
                .unwrap()
                .clone(),
        }]
    );

    let err = depot
        .try_call(json!({"op": "associate", "repo_id": "zoo", "source_repo_id": "ghost"}))
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}
