// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::{Duration, TimeZone};
use serde_json::json;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn sync_spec(schedule: &str) -> ScheduleSpec {
    ScheduleSpec::new(
        OwnerKey::sync("zoo", "yum_importer"),
        CallSpec::new("sync", vec![json!("zoo")]),
        schedule,
    )
}

fn make(schedule: &str) -> Schedule {
    Schedule::new("sched-1", sync_spec(schedule), t0()).unwrap()
}

#[test]
fn defaults_after_creation() {
    let schedule = make("P1DT");

    assert_eq!(schedule.schedule.as_str(), "P1DT");
    assert!(schedule.enabled);
    assert_eq!(schedule.failure_threshold, None);
    assert_eq!(schedule.consecutive_failures, 0);
    assert_eq!(schedule.remaining_runs, None);
    assert_eq!(schedule.first_run, t0());
    assert!(schedule.last_run.is_none());
    assert!(schedule.override_config.is_empty());
    assert_eq!(schedule.state(), ScheduleState::Active);

    let next = schedule.next_run.unwrap();
    assert!(next >= t0() && next <= t0() + Duration::days(1));
}

#[test]
fn serialized_form_has_every_field() {
    let value = serde_json::to_value(make("P1DT")).unwrap();
    let object = value.as_object().unwrap();
    for key in [
        "_id",
        "schedule",
        "failure_threshold",
        "enabled",
        "consecutive_failures",
        "remaining_runs",
        "first_run",
        "last_run",
        "next_run",
        "override_config",
    ] {
        assert!(object.contains_key(key), "missing {}", key);
    }
    assert_eq!(value["_id"], json!("sched-1"));
    assert_eq!(value["schedule"], json!("P1DT"));
    assert_eq!(value["remaining_runs"], Value::Null);
    assert_eq!(value["failure_threshold"], Value::Null);
    assert_eq!(value["override_config"], json!({}));

    let back: Schedule = serde_json::from_value(value).unwrap();
    assert_eq!(back, make("P1DT"));
}

#[test]
fn malformed_interval_is_rejected() {
    let err = Schedule::new("s", sync_spec("not-an-interval"), t0()).unwrap_err();
    assert!(matches!(err, ScheduleError::Iso(_)));
}

#[test]
fn zero_threshold_is_rejected() {
    let err = Schedule::new("s", sync_spec("P1D").failure_threshold(0), t0()).unwrap_err();
    assert_eq!(err, ScheduleError::InvalidFailureThreshold(0));
}

#[test]
fn future_start_is_first_run() {
    let schedule = make("2024-03-05T00:00:00Z/P1D");
    let start = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
    assert_eq!(schedule.first_run, start);
    assert_eq!(schedule.next_run, Some(start));
    assert!(!schedule.is_due(t0()));
}

#[test]
fn past_start_skips_to_next_occurrence() {
    let schedule = make("2024-01-01T06:00:00Z/P1D");
    assert_eq!(
        schedule.next_run,
        Some(Utc.with_ymd_and_hms(2024, 3, 2, 6, 0, 0).unwrap())
    );
}

#[test]
fn created_disabled_has_no_next_run() {
    let schedule = Schedule::new("s", sync_spec("PT1H").enabled(false), t0()).unwrap();
    assert!(!schedule.enabled);
    assert_eq!(schedule.next_run, None);
    assert_eq!(schedule.state(), ScheduleState::Disabled);
}

#[test]
fn started_run_advances_next_run() {
    let schedule = make("PT1H");
    assert!(schedule.is_due(t0()));

    let schedule = schedule.record_run(RunOutcome::Started, t0());
    assert_eq!(schedule.last_run, Some(t0()));
    assert_eq!(schedule.next_run, Some(t0() + Duration::hours(1)));
    assert!(!schedule.is_due(t0()));
}

#[test]
fn late_run_skips_missed_occurrences() {
    let schedule = make("PT1H");
    let late = t0() + Duration::minutes(150);

    let schedule = schedule.record_run(RunOutcome::Started, late);
    assert_eq!(schedule.next_run, Some(t0() + Duration::hours(3)));
}

#[test]
fn recurrence_count_exhausts() {
    let schedule = make("R2/PT1H");
    assert_eq!(schedule.remaining_runs, Some(2));

    let schedule = schedule.record_run(RunOutcome::Started, t0());
    assert_eq!(schedule.remaining_runs, Some(1));
    assert!(schedule.next_run.is_some());

    let second = t0() + Duration::hours(1);
    let schedule = schedule
        .record_run(RunOutcome::Succeeded, second)
        .record_run(RunOutcome::Started, second);
    assert_eq!(schedule.remaining_runs, Some(0));
    assert_eq!(schedule.next_run, None);
    assert_eq!(schedule.state(), ScheduleState::Exhausted);
    assert!(schedule.enabled);
    assert!(!schedule.is_due(second + Duration::days(1)));
}

#[test]
fn consecutive_failures_auto_disable() {
    let schedule = Schedule::new("s", sync_spec("PT1H").failure_threshold(2), t0()).unwrap();

    let schedule = schedule
        .record_run(RunOutcome::Started, t0())
        .record_run(RunOutcome::Failed, t0());
    assert_eq!(schedule.consecutive_failures, 1);
    assert!(schedule.enabled);

    let later = t0() + Duration::hours(1);
    let schedule = schedule
        .record_run(RunOutcome::Started, later)
        .record_run(RunOutcome::Failed, later);
    assert_eq!(schedule.consecutive_failures, 2);
    assert!(!schedule.enabled);
    assert_eq!(schedule.next_run, None);
    assert_eq!(schedule.state(), ScheduleState::Disabled);
    assert!(!schedule.is_due(later + Duration::days(1)));
}

#[test]
fn failure_on_last_recurrence_leaves_schedule_exhausted() {
    let schedule = Schedule::new("s", sync_spec("R1/PT1H").failure_threshold(1), t0()).unwrap();

    let schedule = schedule
        .record_run(RunOutcome::Started, t0())
        .record_run(RunOutcome::Failed, t0());
    assert_eq!(schedule.consecutive_failures, 1);
    assert_eq!(schedule.state(), ScheduleState::Exhausted);
    assert!(schedule.enabled);
    assert_eq!(schedule.next_run, None);
}

#[test]
fn success_resets_failure_count() {
    let schedule = Schedule::new("s", sync_spec("PT1H").failure_threshold(2), t0()).unwrap();
    let schedule = schedule
        .record_run(RunOutcome::Failed, t0())
        .record_run(RunOutcome::Succeeded, t0())
        .record_run(RunOutcome::Failed, t0());
    assert_eq!(schedule.consecutive_failures, 1);
    assert!(schedule.enabled);
}

#[test]
fn rejected_counts_as_failure_and_canceled_does_not() {
    let schedule = make("PT1H");
    let schedule = schedule
        .record_run(RunOutcome::Rejected, t0())
        .record_run(RunOutcome::Canceled, t0());
    assert_eq!(schedule.consecutive_failures, 1);
}

#[test]
fn schedule_update_recomputes_from_last_run() {
    let schedule = make("P1D").record_run(RunOutcome::Started, t0());
    assert_eq!(schedule.next_run, Some(t0() + Duration::days(1)));

    let now = t0() + Duration::hours(2);
    let update = ScheduleUpdate {
        schedule: Some("PT6H".to_string()),
        ..Default::default()
    };
    let updated = schedule.apply_update(update, now).unwrap();

    assert_eq!(updated.schedule.as_str(), "PT6H");
    assert_eq!(updated.first_run, t0());
    assert_eq!(updated.last_run, Some(t0()));
    assert_eq!(updated.next_run, Some(t0() + Duration::hours(6)));
}

#[test]
fn schedule_update_with_start_uses_it() {
    let start = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
    let update = ScheduleUpdate {
        schedule: Some("R4/2024-04-01T00:00:00Z/P1W".to_string()),
        ..Default::default()
    };
    let updated = make("P1D").apply_update(update, t0()).unwrap();
    assert_eq!(updated.first_run, start);
    assert_eq!(updated.next_run, Some(start));
    assert_eq!(updated.remaining_runs, Some(4));
}

#[test]
fn override_only_update_keeps_next_run() {
    let schedule = make("PT1H");
    let mut overrides = Map::new();
    overrides.insert("verify".to_string(), json!(true));
    let update = ScheduleUpdate {
        override_config: Some(overrides.clone()),
        ..Default::default()
    };

    let updated = schedule
        .apply_update(update, t0() + Duration::minutes(30))
        .unwrap();
    assert_eq!(updated.override_config, overrides);
    assert_eq!(updated.next_run, schedule.next_run);
}

#[test]
fn reenabling_resets_failures_and_recomputes() {
    let schedule = Schedule::new("s", sync_spec("PT1H").failure_threshold(1), t0()).unwrap();
    let disabled = schedule.record_run(RunOutcome::Failed, t0());
    assert!(!disabled.enabled);

    let now = t0() + Duration::minutes(90);
    let update = ScheduleUpdate {
        enabled: Some(true),
        ..Default::default()
    };
    let enabled = disabled.apply_update(update, now).unwrap();
    assert!(enabled.enabled);
    assert_eq!(enabled.consecutive_failures, 0);
    assert_eq!(enabled.next_run, Some(t0() + Duration::hours(2)));
}

#[test]
fn disabling_clears_next_run() {
    let update = ScheduleUpdate {
        enabled: Some(false),
        ..Default::default()
    };
    let disabled = make("PT1H").apply_update(update, t0()).unwrap();
    assert_eq!(disabled.next_run, None);
    assert_eq!(disabled.state(), ScheduleState::Disabled);
}

#[test]
fn lowering_threshold_below_failures_disables() {
    let schedule = make("PT1H")
        .record_run(RunOutcome::Failed, t0())
        .record_run(RunOutcome::Failed, t0());
    assert!(schedule.enabled);

    let update = ScheduleUpdate {
        failure_threshold: Some(Some(2)),
        ..Default::default()
    };
    let updated = schedule.apply_update(update, t0()).unwrap();
    assert!(!updated.enabled);
    assert_eq!(updated.next_run, None);
}

#[test]
fn invalid_update_is_rejected() {
    let schedule = make("PT1H");
    let bad_interval = ScheduleUpdate {
        schedule: Some("every tuesday".to_string()),
        ..Default::default()
    };
    assert!(schedule.apply_update(bad_interval, t0()).is_err());

    let bad_threshold = ScheduleUpdate {
        failure_threshold: Some(Some(0)),
        ..Default::default()
    };
    assert_eq!(
        schedule.apply_update(bad_threshold, t0()),
        Err(ScheduleError::InvalidFailureThreshold(0))
    );
}

#[test]
fn update_distinguishes_null_threshold_from_absent() {
    let absent: ScheduleUpdate = serde_json::from_value(json!({})).unwrap();
    assert_eq!(absent.failure_threshold, None);
    assert!(absent.is_empty());

    let cleared: ScheduleUpdate =
        serde_json::from_value(json!({"failure_threshold": null})).unwrap();
    assert_eq!(cleared.failure_threshold, Some(None));

    let set: ScheduleUpdate = serde_json::from_value(json!({"failure_threshold": 3})).unwrap();
    assert_eq!(set.failure_threshold, Some(Some(3)));
}

#[test]
fn overrides_merge_into_call() {
    let call = CallSpec::new("sync", vec![json!("zoo")])
        .with_kwarg(OVERRIDE_CONFIG_KEY, json!({"a": 1, "b": 2}))
        .with_kwarg("other", json!("kept"));
    let mut overrides = Map::new();
    overrides.insert("b".to_string(), json!(3));

    let merged = call.with_overrides(&overrides);
    assert_eq!(merged.kwargs[OVERRIDE_CONFIG_KEY], json!({"a": 1, "b": 3}));
    assert_eq!(merged.kwargs["other"], json!("kept"));
    assert_eq!(merged.args, call.args);
}

#[test]
fn call_for_run_always_carries_override_key() {
    let schedule = make("PT1H");
    let call = schedule.call_for_run();
    assert_eq!(call.kwargs[OVERRIDE_CONFIG_KEY], json!({}));
}

use proptest::prelude::*;

fn arb_outcome() -> impl Strategy<Value = RunOutcome> {
    prop_oneof![
        Just(RunOutcome::Started),
        Just(RunOutcome::Succeeded),
        Just(RunOutcome::Failed),
        Just(RunOutcome::Canceled),
        Just(RunOutcome::Rejected),
    ]
}

proptest! {
    #[test]
    fn enabled_implies_below_threshold(
        threshold in 1u32..5,
        outcomes in proptest::collection::vec(arb_outcome(), 0..30),
    ) {
        let mut schedule =
            Schedule::new("s", sync_spec("PT1H").failure_threshold(threshold), t0()).unwrap();
        let mut now = t0();
        for outcome in outcomes {
            now += Duration::minutes(20);
            schedule = schedule.record_run(outcome, now);
            if schedule.enabled {
                prop_assert!(schedule.consecutive_failures < threshold);
            } else {
                prop_assert!(schedule.next_run.is_none());
            }
        }
    }
}
