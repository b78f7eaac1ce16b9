//! Fan-out of one batch onto the execution backend.
//!
//! [`launch_run`] submits every work unit, records a running detail row per
//! submitted unit and finally the run summary. Units are submitted in chunks
//! of at most `max_concurrency` parallel submissions, run on a dedicated pool
//! with that many threads; the returned identifier list always follows the
//! order of the request's task list.
//!
//! A backend rejection aborts the batch after the chunk in flight settles.
//! Units already accepted keep their detail rows and are reported back in
//! [`FanoutError::Submission::partial`]; no summary is written, so the run is
//! never reported as launched. Store write failures are fatal in the same way.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde_json::{json, Value};

use crate::config::{
    DEFAULT_MAX_CONCURRENCY, ENV_SOURCE_LOCATION, ENV_TASK_NAME, ENV_TRANSFORM_PARAMS,
    ENV_WORKFLOW_NAME, ENV_WORKFLOW_RUN_ID,
};
use crate::contract::{
    normalize_request, stable_contract_json, BackendTarget, IteratorPayload, LaunchRequest,
    ValidationError, WorkUnitSpec,
};
use crate::error::FanoutError;
use crate::logging::{log_error, log_info};
use crate::records::{RunStatus, RunSummary, TaskDetail, TaskStatus};
use crate::store::StatusStore;

const COMPONENT: &str = "task_launcher";

/// Everything the backend needs to start one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSubmission<'a> {
    pub workflow_name: &'a str,
    pub run_id: i64,
    pub unit: &'a WorkUnitSpec,
    pub target: &'a BackendTarget,
    pub environment: BTreeMap<String, String>,
}

pub trait TaskSubmitter: Send + Sync {
    /// Starts one unit and returns its backend-assigned identifier.
    fn submit_task(&self, submission: &TaskSubmission<'_>) -> Result<String, String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub run_id: i64,
    pub start_time: String,
    pub max_concurrency: usize,
    pub worker_environment: BTreeMap<String, String>,
}

impl LaunchOptions {
    /// The run id is the launch instant in epoch milliseconds.
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            run_id: now.timestamp_millis(),
            start_time: now.to_rfc3339(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            worker_environment: BTreeMap::new(),
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_worker_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.worker_environment = environment;
        self
    }
}

pub fn launch_run(
    request: LaunchRequest,
    submitter: &dyn TaskSubmitter,
    store: &dyn StatusStore,
    options: &LaunchOptions,
) -> Result<IteratorPayload, FanoutError> {
    if options.run_id <= 0 {
        return Err(ValidationError::new("run_id must be a positive integer").into());
    }

    let spec_snapshot = stable_contract_json(&request)?;
    let normalized = normalize_request(request)?;
    let workflow_name = normalized.workflow_name.as_str();
    let run_id = options.run_id;
    let chunk_size = options.max_concurrency.max(1);

    log_info(
        COMPONENT,
        "launch_started",
        json!({
            "workflow_name": workflow_name,
            "run_id": run_id,
            "task_count": normalized.task_list.len(),
            "max_concurrency": chunk_size,
        }),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(chunk_size)
        .thread_name(|index| format!("fanout-submit-{index}"))
        .build()
        .map_err(|error| FanoutError::WorkerPool(error.to_string()))?;

    let mut task_ids = Vec::with_capacity(normalized.task_list.len());
    for chunk in normalized.task_list.chunks(chunk_size) {
        let results: Vec<Result<String, String>> = pool.install(|| {
            chunk
                .par_iter()
                .map(|unit| {
                    let submission = TaskSubmission {
                        workflow_name,
                        run_id,
                        unit,
                        target: &normalized.target,
                        environment: container_environment(
                            workflow_name,
                            run_id,
                            unit,
                            &normalized.target,
                            &options.worker_environment,
                        ),
                    };
                    submitter.submit_task(&submission)
                })
                .collect()
        });

        let mut first_failure: Option<(&WorkUnitSpec, String)> = None;
        for (unit, result) in chunk.iter().zip(results) {
            match result {
                Ok(task_id) => {
                    record_running_detail(store, run_id, &task_id, unit, &options.start_time)?;
                    task_ids.push(task_id);
                }
                Err(message) => {
                    if first_failure.is_none() {
                        first_failure = Some((unit, message));
                    }
                }
            }
        }

        if let Some((unit, message)) = first_failure {
            log_error(
                COMPONENT,
                "submission_failed",
                json!({
                    "workflow_name": workflow_name,
                    "run_id": run_id,
                    "task_name": unit.task_name,
                    "error": message,
                    "submitted_before_abort": task_ids.len(),
                }),
            );
            return Err(FanoutError::Submission {
                task_name: unit.task_name.clone(),
                message,
                partial: IteratorPayload::launched(workflow_name, run_id, task_ids),
            });
        }
    }

    let summary = RunSummary {
        workflow_name: workflow_name.to_string(),
        run_id,
        spec_snapshot,
        task_count: normalized.task_list.len(),
        status: RunStatus::Running,
        completed_count: 0,
        failed_count: 0,
        running_count: task_ids.len(),
        start_time: options.start_time.clone(),
        update_time: options.start_time.clone(),
    };
    store.put_summary(&summary).map_err(|message| {
        log_error(
            COMPONENT,
            "summary_write_failed",
            json!({"workflow_name": workflow_name, "run_id": run_id, "error": message}),
        );
        FanoutError::store_write("put_summary", message)
    })?;

    log_info(
        COMPONENT,
        "launch_completed",
        json!({
            "workflow_name": workflow_name,
            "run_id": run_id,
            "task_ids": task_ids,
        }),
    );

    Ok(IteratorPayload::launched(workflow_name, run_id, task_ids))
}

/// Container environment for one unit. Per-unit values win over the worker
/// store settings, which win over caller-supplied target environment.
pub fn container_environment(
    workflow_name: &str,
    run_id: i64,
    unit: &WorkUnitSpec,
    target: &BackendTarget,
    worker_environment: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut environment = target.environment.clone();
    environment.extend(worker_environment.clone());
    let transform_params = Value::Object(unit.transform_params.clone().into_iter().collect());
    environment.extend([
        (ENV_WORKFLOW_NAME.to_string(), workflow_name.to_string()),
        (ENV_WORKFLOW_RUN_ID.to_string(), run_id.to_string()),
        (ENV_TASK_NAME.to_string(), unit.task_name.clone()),
        (ENV_SOURCE_LOCATION.to_string(), unit.source_location.clone()),
        (ENV_TRANSFORM_PARAMS.to_string(), transform_params.to_string()),
    ]);
    environment
}

fn record_running_detail(
    store: &dyn StatusStore,
    run_id: i64,
    task_id: &str,
    unit: &WorkUnitSpec,
    start_time: &str,
) -> Result<(), FanoutError> {
    let detail = TaskDetail {
        run_id,
        task_id: task_id.to_string(),
        task_name: unit.task_name.clone(),
        status: TaskStatus::Running.as_str().to_string(),
        start_time: start_time.to_string(),
        update_time: start_time.to_string(),
        exec_duration_seconds: None,
    };
    store.put_detail(&detail).map_err(|message| {
        log_error(
            COMPONENT,
            "detail_write_failed",
            json!({"run_id": run_id, "task_id": task_id, "error": message}),
        );
        FanoutError::store_write("put_detail", message)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Condvar, Mutex};
    use std::time::Duration;

    use chrono::TimeZone;

    use crate::config::StoreConfig;
    use crate::contract::{RunTarget, TransformParams};
    use crate::records::{DetailUpdate, RunKey, SummaryUpdate, TaskKey};
    use crate::store::InMemoryStatusStore;

    use super::*;

    struct RecordingSubmitter {
        fail_on: Option<&'static str>,
        submissions: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    }

    impl RecordingSubmitter {
        fn new() -> Self {
            Self {
                fail_on: None,
                submissions: Mutex::new(Vec::new()),
            }
        }

        fn failing_on(task_name: &'static str) -> Self {
            Self {
                fail_on: Some(task_name),
                submissions: Mutex::new(Vec::new()),
            }
        }

        fn submitted_names(&self) -> Vec<String> {
            let mut names: Vec<String> = self
                .submissions
                .lock()
                .expect("poisoned mutex")
                .iter()
                .map(|(name, _)| name.clone())
                .collect();
            names.sort();
            names
        }

        fn environment_of(&self, task_name: &str) -> BTreeMap<String, String> {
            self.submissions
                .lock()
                .expect("poisoned mutex")
                .iter()
                .find(|(name, _)| name == task_name)
                .map(|(_, env)| env.clone())
                .expect("task should have been submitted")
        }
    }

    impl TaskSubmitter for RecordingSubmitter {
        fn submit_task(&self, submission: &TaskSubmission<'_>) -> Result<String, String> {
            if self.fail_on == Some(submission.unit.task_name.as_str()) {
                return Err("capacity unavailable".to_string());
            }
            self.submissions.lock().expect("poisoned mutex").push((
                submission.unit.task_name.clone(),
                submission.environment.clone(),
            ));
            Ok(format!(
                "arn:aws:ecs:us-east-1:123456789012:task/batch/{}",
                submission.unit.task_name
            ))
        }
    }

    struct RejectingStore {
        inner: InMemoryStatusStore,
        reject_summary: bool,
    }

    impl StatusStore for RejectingStore {
        fn put_summary(&self, summary: &RunSummary) -> Result<(), String> {
            if self.reject_summary {
                return Err("ProvisionedThroughputExceeded".to_string());
            }
            self.inner.put_summary(summary)
        }

        fn put_detail(&self, detail: &TaskDetail) -> Result<(), String> {
            if !self.reject_summary {
                return Err("AccessDenied".to_string());
            }
            self.inner.put_detail(detail)
        }

        fn update_summary(&self, key: &RunKey, update: &SummaryUpdate) -> Result<(), String> {
            self.inner.update_summary(key, update)
        }

        fn update_detail(&self, key: &TaskKey, update: &DetailUpdate) -> Result<(), String> {
            self.inner.update_detail(key, update)
        }

        fn query_details_by_run(&self, run_id: i64) -> Result<Vec<TaskDetail>, String> {
            self.inner.query_details_by_run(run_id)
        }

        fn get_summary(&self, key: &RunKey) -> Result<Option<RunSummary>, String> {
            self.inner.get_summary(key)
        }
    }

    fn sample_request(names: &[&str]) -> LaunchRequest {
        LaunchRequest {
            workflow_name: "nightly-copy".to_string(),
            run_target: RunTarget {
                cluster_name: "batch-cluster".to_string(),
                task_definition: "copy-task:3".to_string(),
                container_name: "worker".to_string(),
                subnet_ids: vec!["subnet-a".to_string()],
                security_group_ids: vec!["sg-1".to_string()],
                subnet_id_literal: None,
                security_group_literal: None,
                separator: None,
                environment: BTreeMap::from([("LOG_LEVEL".to_string(), "debug".to_string())]),
            },
            task_list: names
                .iter()
                .map(|name| WorkUnitSpec {
                    task_name: name.to_string(),
                    source_location: format!("s3://input-bucket/{name}.csv"),
                    transform_params: TransformParams::from([(
                        "format".to_string(),
                        Value::from("parquet"),
                    )]),
                })
                .collect(),
        }
    }

    fn sample_options() -> LaunchOptions {
        let now = Utc
            .with_ymd_and_hms(2026, 10, 16, 8, 0, 0)
            .single()
            .expect("valid timestamp");
        LaunchOptions::starting_at(now)
            .with_worker_environment(StoreConfig::default().worker_environment())
    }

    #[test]
    fn launch_records_one_running_detail_per_unit_and_one_summary() {
        let store = InMemoryStatusStore::new();
        let submitter = RecordingSubmitter::new();
        let options = sample_options();

        let payload = launch_run(
            sample_request(&["users", "orders", "items"]),
            &submitter,
            &store,
            &options,
        )
        .expect("launch should succeed");

        assert_eq!(payload.run_id, options.run_id);
        assert_eq!(payload.continue_polling, None);
        assert_eq!(
            payload.task_ids,
            vec![
                "arn:aws:ecs:us-east-1:123456789012:task/batch/users",
                "arn:aws:ecs:us-east-1:123456789012:task/batch/orders",
                "arn:aws:ecs:us-east-1:123456789012:task/batch/items",
            ]
        );

        let details = store.query_details_by_run(options.run_id).expect("query");
        assert_eq!(details.len(), 3);
        assert!(details.iter().all(|row| row.status == "Running"));

        let summaries = store.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].task_count, 3);
        assert_eq!(summaries[0].status, RunStatus::Running);
        assert_eq!(summaries[0].workflow_name, "nightly-copy");
    }

    #[test]
    fn launch_preserves_submission_order_with_single_slot() {
        let store = InMemoryStatusStore::new();
        let submitter = RecordingSubmitter::new();
        let options = sample_options().with_max_concurrency(1);

        let payload = launch_run(sample_request(&["b", "a", "c"]), &submitter, &store, &options)
            .expect("launch should succeed");

        let names: Vec<_> = payload
            .task_ids
            .iter()
            .map(|id| id.rsplit('/').next().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn empty_batch_returns_valid_empty_payload() {
        let store = InMemoryStatusStore::new();
        let submitter = RecordingSubmitter::new();

        let payload = launch_run(sample_request(&[]), &submitter, &store, &sample_options())
            .expect("empty launch should succeed");

        assert!(payload.task_ids.is_empty());
        assert!(payload.validate().is_ok());
        assert_eq!(store.summaries()[0].task_count, 0);
        assert!(store.details().is_empty());
    }

    #[test]
    fn submission_failure_aborts_and_reports_partial_ids() {
        let store = InMemoryStatusStore::new();
        let submitter = RecordingSubmitter::failing_on("c");
        let options = sample_options().with_max_concurrency(2);

        let error = launch_run(
            sample_request(&["a", "b", "c", "d", "e"]),
            &submitter,
            &store,
            &options,
        )
        .expect_err("launch should fail");

        match error {
            FanoutError::Submission {
                task_name, partial, ..
            } => {
                assert_eq!(task_name, "c");
                // chunk [c, d] settles before the abort, chunk [e] never starts
                assert_eq!(partial.task_ids.len(), 3);
                assert!(partial.task_ids[2].ends_with("/d"));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(submitter.submitted_names(), vec!["a", "b", "d"]);
        assert_eq!(store.details().len(), 3);
        assert!(store.summaries().is_empty());
    }

    /// Holds each submission until `target` submissions have been in flight
    /// at once, or a timeout passes, and records the peak.
    struct OverlapSubmitter {
        target: usize,
        in_flight: Mutex<(usize, usize)>,
        arrived: Condvar,
    }

    impl OverlapSubmitter {
        fn new(target: usize) -> Self {
            Self {
                target,
                in_flight: Mutex::new((0, 0)),
                arrived: Condvar::new(),
            }
        }

        fn peak(&self) -> usize {
            self.in_flight.lock().expect("poisoned mutex").1
        }
    }

    impl TaskSubmitter for OverlapSubmitter {
        fn submit_task(&self, submission: &TaskSubmission<'_>) -> Result<String, String> {
            let mut state = self.in_flight.lock().expect("poisoned mutex");
            state.0 += 1;
            state.1 = state.1.max(state.0);
            self.arrived.notify_all();
            let (mut state, _) = self
                .arrived
                .wait_timeout_while(state, Duration::from_secs(5), |(_, peak)| {
                    *peak < self.target
                })
                .expect("poisoned mutex");
            state.0 -= 1;
            Ok(format!("arn:task/{}", submission.unit.task_name))
        }
    }

    #[test]
    fn configured_concurrency_is_reached_regardless_of_cpu_count() {
        let store = InMemoryStatusStore::new();
        let submitter = OverlapSubmitter::new(4);
        let options = sample_options().with_max_concurrency(4);

        let payload = launch_run(
            sample_request(&["a", "b", "c", "d", "e", "f", "g", "h"]),
            &submitter,
            &store,
            &options,
        )
        .expect("launch should succeed");

        assert_eq!(submitter.peak(), 4);
        assert_eq!(payload.task_ids.len(), 8);
        assert_eq!(payload.task_ids[7], "arn:task/h");
    }

    #[test]
    fn summary_write_failure_is_fatal() {
        let store = RejectingStore {
            inner: InMemoryStatusStore::new(),
            reject_summary: true,
        };
        let submitter = RecordingSubmitter::new();

        let error = launch_run(sample_request(&["a"]), &submitter, &store, &sample_options())
            .expect_err("launch should fail");

        assert!(matches!(
            error,
            FanoutError::StoreWrite {
                operation: "put_summary",
                ..
            }
        ));
    }

    #[test]
    fn detail_write_failure_stops_before_further_submissions() {
        let store = RejectingStore {
            inner: InMemoryStatusStore::new(),
            reject_summary: false,
        };
        let submitter = RecordingSubmitter::new();
        let options = sample_options().with_max_concurrency(1);

        let error = launch_run(sample_request(&["a", "b"]), &submitter, &store, &options)
            .expect_err("launch should fail");

        assert!(matches!(
            error,
            FanoutError::StoreWrite {
                operation: "put_detail",
                ..
            }
        ));
        assert_eq!(submitter.submitted_names(), vec!["a"]);
    }

    #[test]
    fn malformed_request_submits_nothing() {
        let store = InMemoryStatusStore::new();
        let submitter = RecordingSubmitter::new();
        let mut request = sample_request(&["a"]);
        request.run_target.cluster_name = String::new();

        let error = launch_run(request, &submitter, &store, &sample_options())
            .expect_err("launch should fail");

        assert!(matches!(error, FanoutError::MalformedInput(_)));
        assert!(submitter.submitted_names().is_empty());
    }

    #[test]
    fn submissions_carry_run_identity_and_worker_settings() {
        let store = InMemoryStatusStore::new();
        let submitter = RecordingSubmitter::new();
        let options = sample_options();

        launch_run(sample_request(&["users"]), &submitter, &store, &options)
            .expect("launch should succeed");

        let env = submitter.environment_of("users");
        assert_eq!(env[ENV_WORKFLOW_NAME], "nightly-copy");
        assert_eq!(env[ENV_WORKFLOW_RUN_ID], options.run_id.to_string());
        assert_eq!(env[ENV_SOURCE_LOCATION], "s3://input-bucket/users.csv");
        assert_eq!(env[ENV_TRANSFORM_PARAMS], r#"{"format":"parquet"}"#);
        assert_eq!(env["workflow_details_ddb_table_name"], "workflow_details");
        assert_eq!(env["LOG_LEVEL"], "debug");
    }

    #[test]
    fn summary_snapshot_round_trips_the_request() {
        let store = InMemoryStatusStore::new();
        let submitter = RecordingSubmitter::new();
        let request = sample_request(&["users", "orders"]);

        let payload = launch_run(request.clone(), &submitter, &store, &sample_options())
            .expect("launch should succeed");

        let summary = store
            .get_summary(&RunKey {
                workflow_name: payload.workflow_name.clone(),
                run_id: payload.run_id,
            })
            .expect("get")
            .expect("summary should exist");
        let snapshot: LaunchRequest =
            serde_json::from_str(&summary.spec_snapshot).expect("snapshot should parse");
        assert_eq!(snapshot, request);
        assert_eq!(summary.task_count, 2);
    }
}
