//! Launch → Poll → {Wait → Poll | Done} driver for one run.
//!
//! Every transition is saved through a [`CheckpointStore`] before the next
//! one starts. The only suspension point is `Wait`; a process that restarts
//! from a `Wait` checkpoint goes straight back to `Poll`. Launch errors are
//! returned to the caller; a submission abort first records the units it
//! already started in the checkpoint. Read failures while polling are retried after the
//! normal wait interval.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::checkpoint::{Checkpoint, CheckpointStore, OrchestratorState};
use crate::config::{RuntimeConfig, DEFAULT_MAX_CONCURRENCY, DEFAULT_POLL_WAIT_SECONDS};
use crate::contract::{IteratorPayload, LaunchRequest};
use crate::error::FanoutError;
use crate::launcher::{launch_run, LaunchOptions, TaskSubmitter};
use crate::logging::{log_info, log_warn};
use crate::monitor::{poll_run, TaskTally};
use crate::records::{RunKey, RunSummary};
use crate::store::StatusStore;

const COMPONENT: &str = "orchestrator";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub wait_interval: Duration,
    pub max_concurrency: usize,
    pub worker_environment: BTreeMap<String, String>,
}

impl OrchestratorConfig {
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            wait_interval: config.poll_wait,
            max_concurrency: config.max_concurrency,
            worker_environment: config.store.worker_environment(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            wait_interval: Duration::from_secs(DEFAULT_POLL_WAIT_SECONDS),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            worker_environment: BTreeMap::new(),
        }
    }
}

/// Terminal result of a run. An all-failed batch is still a normal report;
/// compare `tally.failed` with the task count to tell it apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub payload: IteratorPayload,
    pub tally: TaskTally,
    pub polls: u32,
    pub summary: Option<RunSummary>,
}

pub struct Orchestrator<'a> {
    submitter: &'a dyn TaskSubmitter,
    store: &'a dyn StatusStore,
    checkpoints: &'a dyn CheckpointStore,
    clock: &'a dyn Clock,
    sleeper: &'a dyn Sleeper,
    config: OrchestratorConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        submitter: &'a dyn TaskSubmitter,
        store: &'a dyn StatusStore,
        checkpoints: &'a dyn CheckpointStore,
        clock: &'a dyn Clock,
        sleeper: &'a dyn Sleeper,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            submitter,
            store,
            checkpoints,
            clock,
            sleeper,
            config,
        }
    }

    pub fn start(&self, request: LaunchRequest) -> Result<RunReport, FanoutError> {
        self.run(Checkpoint::new(request))
    }

    /// Continues from the saved checkpoint; a run suspended in `Wait`
    /// re-enters at `Poll`.
    pub fn resume(&self) -> Result<RunReport, FanoutError> {
        let mut checkpoint = self
            .checkpoints
            .load()
            .map_err(FanoutError::Checkpoint)?
            .ok_or_else(|| FanoutError::Checkpoint("no checkpoint to resume".to_string()))?;
        if checkpoint.state == OrchestratorState::Wait {
            checkpoint.state = OrchestratorState::Poll;
        }
        if checkpoint.state == OrchestratorState::Launch
            && !checkpoint.aborted_launches.is_empty()
        {
            log_warn(
                COMPONENT,
                "relaunch_after_abort",
                json!({
                    "aborted_launches": checkpoint.aborted_launches.len(),
                    "orphaned_task_ids": checkpoint.orphaned_task_ids(),
                }),
            );
        }
        log_info(
            COMPONENT,
            "run_resumed",
            json!({
                "state": checkpoint.state,
                "run_id": checkpoint.payload.as_ref().map(|payload| payload.run_id),
                "polls": checkpoint.polls,
            }),
        );
        self.run(checkpoint)
    }

    pub fn run(&self, mut checkpoint: Checkpoint) -> Result<RunReport, FanoutError> {
        self.save(&checkpoint)?;
        while !checkpoint.is_done() {
            checkpoint = self.step(checkpoint)?;
            self.save(&checkpoint)?;
        }
        self.report(checkpoint)
    }

    /// Performs exactly one transition.
    pub fn step(&self, mut checkpoint: Checkpoint) -> Result<Checkpoint, FanoutError> {
        match checkpoint.state {
            OrchestratorState::Launch => {
                let options = LaunchOptions::starting_at(self.clock.now())
                    .with_max_concurrency(self.config.max_concurrency)
                    .with_worker_environment(self.config.worker_environment.clone());
                let launched = launch_run(
                    checkpoint.request.clone(),
                    self.submitter,
                    self.store,
                    &options,
                );
                match launched {
                    Ok(payload) => {
                        checkpoint.payload = Some(payload);
                        checkpoint.state = OrchestratorState::Poll;
                    }
                    Err(error) => {
                        if let FanoutError::Submission { partial, .. } = &error {
                            checkpoint.aborted_launches.push(partial.clone());
                            checkpoint.last_error = Some(error.to_string());
                            self.save(&checkpoint)?;
                        }
                        return Err(error);
                    }
                }
            }
            OrchestratorState::Poll => {
                let payload = checkpoint.payload.clone().ok_or_else(|| {
                    FanoutError::Checkpoint("poll state has no iterator payload".to_string())
                })?;
                let update_time = self.clock.now().to_rfc3339();
                checkpoint.polls += 1;
                match poll_run(payload, self.store, &update_time) {
                    Ok(outcome) => {
                        checkpoint.state = if outcome.should_continue() {
                            OrchestratorState::Wait
                        } else {
                            OrchestratorState::Done
                        };
                        checkpoint.tally = Some(outcome.tally);
                        checkpoint.payload = Some(outcome.payload);
                        checkpoint.last_error = None;
                    }
                    Err(error) if error.is_retryable() => {
                        log_warn(
                            COMPONENT,
                            "poll_retry_scheduled",
                            json!({
                                "run_id": checkpoint.payload.as_ref().map(|p| p.run_id),
                                "polls": checkpoint.polls,
                                "error": error.to_string(),
                            }),
                        );
                        checkpoint.last_error = Some(error.to_string());
                        checkpoint.state = OrchestratorState::Wait;
                    }
                    Err(error) => return Err(error),
                }
            }
            OrchestratorState::Wait => {
                self.sleeper.sleep(self.config.wait_interval);
                checkpoint.state = OrchestratorState::Poll;
            }
            OrchestratorState::Done => {}
        }
        Ok(checkpoint)
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), FanoutError> {
        self.checkpoints
            .save(checkpoint)
            .map_err(FanoutError::Checkpoint)
    }

    fn report(&self, checkpoint: Checkpoint) -> Result<RunReport, FanoutError> {
        let payload = checkpoint.payload.ok_or_else(|| {
            FanoutError::Checkpoint("finished run has no iterator payload".to_string())
        })?;
        let key = RunKey {
            workflow_name: payload.workflow_name.clone(),
            run_id: payload.run_id,
        };
        let summary = match self.store.get_summary(&key) {
            Ok(summary) => summary,
            Err(message) => {
                log_warn(
                    COMPONENT,
                    "summary_read_failed",
                    json!({"run_id": key.run_id, "error": message}),
                );
                None
            }
        };
        let tally = checkpoint.tally.unwrap_or_default();

        log_info(
            COMPONENT,
            "run_finished",
            json!({
                "workflow_name": key.workflow_name,
                "run_id": key.run_id,
                "polls": checkpoint.polls,
                "completed_tasks": tally.completed,
                "failed_tasks": tally.failed,
            }),
        );

        Ok(RunReport {
            payload,
            tally,
            polls: checkpoint.polls,
            summary,
        })
    }
}
