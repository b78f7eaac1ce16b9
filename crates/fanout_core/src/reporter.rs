//! Status reporting from inside a running work unit.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::contract::ValidationError;
use crate::error::FanoutError;
use crate::logging::log_info;
use crate::records::{DetailUpdate, TaskKey, TaskStatus};
use crate::store::StatusStore;

const COMPONENT: &str = "task_reporter";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TaskOutcome {
    pub fn from_exit(success: bool, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        Self {
            status: if success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            },
            started_at,
            finished_at,
        }
    }

    /// Whole seconds between start and finish; a clock that ran backwards
    /// yields zero.
    pub fn duration_seconds(&self) -> u64 {
        let seconds = (self.finished_at - self.started_at).num_seconds();
        u64::try_from(seconds).unwrap_or(0)
    }
}

/// Marks the unit's detail row terminal. The update is blind: the row is
/// upserted even if the launcher has not written it yet.
pub fn report_task_outcome(
    store: &dyn StatusStore,
    run_id: i64,
    task_id: &str,
    outcome: &TaskOutcome,
) -> Result<DetailUpdate, FanoutError> {
    if run_id <= 0 {
        return Err(ValidationError::new(format!("run_id must be positive, got {run_id}")).into());
    }
    if task_id.trim().is_empty() {
        return Err(ValidationError::new("task_id cannot be empty").into());
    }
    if !outcome.status.is_terminal() {
        return Err(ValidationError::new(format!(
            "reported status must be terminal, got {}",
            outcome.status
        ))
        .into());
    }

    let key = TaskKey {
        run_id,
        task_id: task_id.to_string(),
    };
    let update = DetailUpdate {
        status: outcome.status,
        update_time: outcome.finished_at.to_rfc3339(),
        exec_duration_seconds: Some(outcome.duration_seconds()),
    };
    store
        .update_detail(&key, &update)
        .map_err(|message| FanoutError::store_write("update_detail", message))?;

    log_info(
        COMPONENT,
        "task_outcome_reported",
        json!({
            "run_id": run_id,
            "task_id": task_id,
            "status": update.status.as_str(),
            "exec_time_in_seconds": update.exec_duration_seconds,
        }),
    );
    Ok(update)
}

#[derive(Debug, Deserialize)]
struct TaskMetadata {
    #[serde(rename = "TaskARN")]
    task_arn: Option<String>,
}

/// Extracts `TaskARN` from an ECS task metadata (v4 `/task`) document.
pub fn parse_task_arn(metadata_json: &str) -> Result<String, ValidationError> {
    let metadata: TaskMetadata = serde_json::from_str(metadata_json)
        .map_err(|error| ValidationError::new(format!("invalid task metadata: {error}")))?;
    metadata
        .task_arn
        .map(|arn| arn.trim().to_string())
        .filter(|arn| !arn.is_empty())
        .ok_or_else(|| ValidationError::new("task metadata has no TaskARN"))
}
