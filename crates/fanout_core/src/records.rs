use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Completed => "Completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    /// Maps a stored status string onto a bucket. Matching ignores case and
    /// surrounding whitespace; anything unrecognized (including an empty
    /// value) counts as running.
    pub fn classify(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Running,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey {
    pub workflow_name: String,
    pub run_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub run_id: i64,
    pub task_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub workflow_name: String,
    pub run_id: i64,
    pub spec_snapshot: String,
    pub task_count: usize,
    pub status: RunStatus,
    pub completed_count: usize,
    pub failed_count: usize,
    pub running_count: usize,
    pub start_time: String,
    pub update_time: String,
}

impl RunSummary {
    pub fn key(&self) -> RunKey {
        RunKey {
            workflow_name: self.workflow_name.clone(),
            run_id: self.run_id,
        }
    }

    /// True when the run finished and every unit ended Failed.
    pub fn all_failed(&self) -> bool {
        self.status == RunStatus::Completed && self.failed_count == self.task_count
    }
}

/// Stored detail rows keep the raw status string; the monitor classifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetail {
    pub run_id: i64,
    pub task_id: String,
    pub task_name: String,
    pub status: String,
    pub start_time: String,
    pub update_time: String,
    pub exec_duration_seconds: Option<u64>,
}

impl TaskDetail {
    pub fn key(&self) -> TaskKey {
        TaskKey {
            run_id: self.run_id,
            task_id: self.task_id.clone(),
        }
    }

    pub fn classified_status(&self) -> TaskStatus {
        TaskStatus::classify(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryUpdate {
    pub status: RunStatus,
    pub completed_count: usize,
    pub failed_count: usize,
    pub running_count: usize,
    pub update_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailUpdate {
    pub status: TaskStatus,
    pub update_time: String,
    pub exec_duration_seconds: Option<u64>,
}
