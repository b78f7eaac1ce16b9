//! Error taxonomy shared by the launcher, monitor and orchestrator.

use thiserror::Error;

use crate::contract::{IteratorPayload, ValidationError};

#[derive(Debug, Error)]
pub enum FanoutError {
    /// The backend rejected a unit. `partial` lists every unit submitted
    /// before the batch was aborted so the caller can clean up.
    #[error("failed to submit task '{task_name}': {message}")]
    Submission {
        task_name: String,
        message: String,
        partial: IteratorPayload,
    },

    #[error("status store write failed during {operation}: {message}")]
    StoreWrite {
        operation: &'static str,
        message: String,
    },

    #[error("status store read failed during {operation}: {message}")]
    StoreRead {
        operation: &'static str,
        message: String,
    },

    #[error("malformed input: {0}")]
    MalformedInput(#[from] ValidationError),

    #[error("checkpoint persistence failed: {0}")]
    Checkpoint(String),

    #[error("failed to start submission workers: {0}")]
    WorkerPool(String),
}

impl FanoutError {
    pub fn store_write(operation: &'static str, message: impl Into<String>) -> Self {
        Self::StoreWrite {
            operation,
            message: message.into(),
        }
    }

    pub fn store_read(operation: &'static str, message: impl Into<String>) -> Self {
        Self::StoreRead {
            operation,
            message: message.into(),
        }
    }

    /// Failures a poller should retry on its next interval rather than
    /// treat as the end of the workflow.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreRead { .. })
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Submission { .. } => "submission_error",
            Self::StoreWrite { .. } => "store_write_error",
            Self::StoreRead { .. } => "store_read_error",
            Self::MalformedInput(_) => "malformed_input",
            Self::Checkpoint(_) => "checkpoint_error",
            Self::WorkerPool(_) => "worker_pool_error",
        }
    }

    /// Backend ids of units that were started before a submission abort.
    pub fn partial_task_ids(&self) -> Option<&[String]> {
        match self {
            Self::Submission { partial, .. } => Some(&partial.task_ids),
            _ => None,
        }
    }

    /// `"{code}: {error}"`, followed by the started ids when a submission
    /// abort left units running.
    pub fn caller_message(&self) -> String {
        let mut message = format!("{}: {self}", self.error_code());
        if let Some(task_ids) = self.partial_task_ids().filter(|ids| !ids.is_empty()) {
            message.push_str(&format!(
                " (started before abort: {})",
                task_ids.join(", ")
            ));
        }
        message
    }
}
