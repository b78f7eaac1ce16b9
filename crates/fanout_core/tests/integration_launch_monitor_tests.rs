mod support;

use fanout_core::config::{StoreConfig, ENV_DETAILS_TABLE, ENV_TASK_NAME, ENV_WORKFLOW_RUN_ID};
use fanout_core::launcher::{launch_run, LaunchOptions};
use fanout_core::monitor::poll_run;
use fanout_core::records::{RunKey, RunStatus, TaskKey, TaskStatus};
use fanout_core::reporter::{report_task_outcome, TaskOutcome};
use fanout_core::store::{InMemoryStatusStore, StatusStore};
use support::backend::{FakeBackend, FixedClock};
use support::requests::{launch_request, WORKFLOW};

fn launch_options() -> LaunchOptions {
    LaunchOptions::starting_at(FixedClock::morning().0)
        .with_worker_environment(StoreConfig::default().worker_environment())
}

fn finish(store: &InMemoryStatusStore, run_id: i64, task_id: &str, success: bool) {
    let start = FixedClock::morning().0;
    let outcome = TaskOutcome::from_exit(success, start, start + chrono::Duration::seconds(30));
    report_task_outcome(store, run_id, task_id, &outcome).expect("report outcome");
}

#[test]
fn launch_writes_one_running_row_per_unit_and_a_summary() {
    let store = InMemoryStatusStore::new();
    let backend = FakeBackend::default();

    let payload = launch_run(
        launch_request(&["alpha", "beta", "gamma"]),
        &backend,
        &store,
        &launch_options(),
    )
    .expect("launch");

    assert_eq!(payload.workflow_name, WORKFLOW);
    assert_eq!(payload.run_id, FixedClock::morning().run_id());
    assert_eq!(payload.continue_polling, None);
    assert_eq!(
        payload.task_ids,
        vec![
            FakeBackend::arn_for("alpha"),
            FakeBackend::arn_for("beta"),
            FakeBackend::arn_for("gamma"),
        ]
    );

    let details = store.query_details_by_run(payload.run_id).expect("query");
    assert_eq!(details.len(), 3);
    assert!(details
        .iter()
        .all(|row| row.classified_status() == TaskStatus::Running));

    let summary = store
        .get_summary(&RunKey {
            workflow_name: WORKFLOW.to_string(),
            run_id: payload.run_id,
        })
        .expect("get")
        .expect("summary");
    assert_eq!(summary.task_count, 3);
    assert_eq!(summary.status, RunStatus::Running);
    assert!(summary.spec_snapshot.contains("\"alpha\""));
}

#[test]
fn every_unit_is_started_with_its_own_environment() {
    let store = InMemoryStatusStore::new();
    let backend = FakeBackend::default();

    let payload = launch_run(
        launch_request(&["alpha", "beta"]),
        &backend,
        &store,
        &launch_options(),
    )
    .expect("launch");

    let mut submitted = backend.submitted();
    submitted.sort_by(|left, right| left.0.cmp(&right.0));
    assert_eq!(submitted.len(), 2);
    for (arn, environment) in submitted {
        let task_name = environment.get(ENV_TASK_NAME).expect("task name");
        assert_eq!(arn, FakeBackend::arn_for(task_name));
        assert_eq!(
            environment.get(ENV_WORKFLOW_RUN_ID),
            Some(&payload.run_id.to_string())
        );
        assert_eq!(
            environment.get(ENV_DETAILS_TABLE).map(String::as_str),
            Some("workflow_details")
        );
        assert_eq!(environment.get("LOG_LEVEL").map(String::as_str), Some("debug"));
    }
}

#[test]
fn three_units_with_one_failure_finish_after_polling() {
    let store = InMemoryStatusStore::new();
    let backend = FakeBackend::default();
    let payload = launch_run(
        launch_request(&["alpha", "beta", "gamma"]),
        &backend,
        &store,
        &launch_options(),
    )
    .expect("launch");
    let run_id = payload.run_id;

    let first = poll_run(payload, &store, "2026-10-16T08:02:00+00:00").expect("poll");
    assert!(first.should_continue());
    assert_eq!(first.tally.running, 3);

    finish(&store, run_id, &FakeBackend::arn_for("alpha"), true);
    finish(&store, run_id, &FakeBackend::arn_for("gamma"), false);
    let second = poll_run(first.payload, &store, "2026-10-16T08:04:00+00:00").expect("poll");
    assert!(second.should_continue());
    assert_eq!(
        (second.tally.completed, second.tally.failed, second.tally.running),
        (1, 1, 1)
    );

    finish(&store, run_id, &FakeBackend::arn_for("beta"), true);
    let third = poll_run(second.payload, &store, "2026-10-16T08:06:00+00:00").expect("poll");
    assert!(!third.should_continue());

    let summary = store
        .get_summary(&RunKey {
            workflow_name: WORKFLOW.to_string(),
            run_id,
        })
        .expect("get")
        .expect("summary");
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(
        (summary.completed_count, summary.failed_count, summary.running_count),
        (2, 1, 0)
    );
    assert_eq!(summary.task_count, 3);
    assert_eq!(summary.update_time, "2026-10-16T08:06:00+00:00");

    let failed_row = store
        .detail(&TaskKey {
            run_id,
            task_id: FakeBackend::arn_for("gamma"),
        })
        .expect("row");
    assert_eq!(failed_row.status, "Failed");
    assert_eq!(failed_row.exec_duration_seconds, Some(30));
    assert_eq!(failed_row.task_name, "gamma");
}

#[test]
fn empty_batch_completes_on_first_poll() {
    let store = InMemoryStatusStore::new();
    let backend = FakeBackend::default();

    let payload =
        launch_run(launch_request(&[]), &backend, &store, &launch_options()).expect("launch");
    assert!(payload.task_ids.is_empty());
    assert!(backend.submitted().is_empty());

    let outcome = poll_run(payload, &store, "2026-10-16T08:02:00+00:00").expect("poll");
    assert!(!outcome.should_continue());
    assert_eq!(store.summaries()[0].task_count, 0);
}
