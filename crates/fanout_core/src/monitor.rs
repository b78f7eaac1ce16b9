//! Aggregate completion check for a launched run.
//!
//! [`poll_run`] reads the detail rows of the run, buckets the payload's tasks, overwrites
//! the summary counters and returns the payload with its `continue` flag set.
//! Calling it again with unchanged rows yields the same decision and counts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::contract::IteratorPayload;
use crate::error::FanoutError;
use crate::logging::{log_info, log_warn};
use crate::records::{RunKey, RunStatus, SummaryUpdate, TaskDetail, TaskStatus};
use crate::store::StatusStore;

const COMPONENT: &str = "task_monitor";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTally {
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
}

impl TaskTally {
    /// Buckets the payload's task ids by the status of their detail rows.
    /// Rows for ids outside the payload are ignored, and ids with no row
    /// yet count as running, so the tally always sums to `task_ids.len()`.
    pub fn from_details(task_ids: &[String], details: &[TaskDetail]) -> Self {
        let statuses: HashMap<&str, TaskStatus> = details
            .iter()
            .map(|detail| (detail.task_id.as_str(), detail.classified_status()))
            .collect();
        let mut tally = Self::default();
        for task_id in task_ids {
            match statuses.get(task_id.as_str()) {
                Some(TaskStatus::Completed) => tally.completed += 1,
                Some(TaskStatus::Failed) => tally.failed += 1,
                Some(TaskStatus::Running) | None => tally.running += 1,
            }
        }
        tally
    }

    pub fn terminal(&self) -> usize {
        self.completed + self.failed
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed + self.running
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub payload: IteratorPayload,
    pub tally: TaskTally,
    pub status: RunStatus,
    /// False when the summary update failed; the next poll rewrites it.
    pub summary_persisted: bool,
}

impl PollOutcome {
    pub fn should_continue(&self) -> bool {
        self.payload.should_continue()
    }
}

pub fn poll_run(
    payload: IteratorPayload,
    store: &dyn StatusStore,
    update_time: &str,
) -> Result<PollOutcome, FanoutError> {
    payload.validate()?;

    let details = store
        .query_details_by_run(payload.run_id)
        .map_err(|message| FanoutError::store_read("query_details_by_run", message))?;

    let tally = TaskTally::from_details(&payload.task_ids, &details);
    let continue_polling = tally.terminal() < payload.task_count();
    let status = if continue_polling {
        RunStatus::Running
    } else {
        RunStatus::Completed
    };

    let key = RunKey {
        workflow_name: payload.workflow_name.clone(),
        run_id: payload.run_id,
    };
    let update = SummaryUpdate {
        status,
        completed_count: tally.completed,
        failed_count: tally.failed,
        running_count: tally.running,
        update_time: update_time.to_string(),
    };
    let summary_persisted = match store.update_summary(&key, &update) {
        Ok(()) => true,
        Err(message) => {
            log_warn(
                COMPONENT,
                "summary_update_failed",
                json!({
                    "workflow_name": key.workflow_name,
                    "run_id": key.run_id,
                    "error": message,
                }),
            );
            false
        }
    };

    log_info(
        COMPONENT,
        "poll_completed",
        json!({
            "workflow_name": payload.workflow_name,
            "run_id": payload.run_id,
            "rows_read": details.len(),
            "completed_tasks": tally.completed,
            "failed_tasks": tally.failed,
            "running_tasks": tally.running,
            "status": status.as_str(),
            "continue": continue_polling,
        }),
    );

    Ok(PollOutcome {
        payload: payload.with_decision(continue_polling),
        tally,
        status,
        summary_persisted,
    })
}
