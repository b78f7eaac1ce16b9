//! Status store contract consumed by the launcher, monitor and reporter.
//!
//! Two logical tables back a run: the run summary (keyed by workflow name and
//! run id) and the task details (keyed by run id and task id). Implementations
//! only store and return rows; every decision about what the rows mean lives
//! in [`crate::launcher`] and [`crate::monitor`].
//!
//! Errors are plain strings at this seam. Callers map them onto
//! [`crate::error::FanoutError`] depending on which phase failed.

pub mod memory;

use crate::records::{DetailUpdate, RunKey, RunSummary, SummaryUpdate, TaskDetail, TaskKey};

pub use memory::InMemoryStatusStore;

pub trait StatusStore: Send + Sync {
    /// Unconditional insert or overwrite of a summary row.
    fn put_summary(&self, summary: &RunSummary) -> Result<(), String>;

    /// Unconditional insert or overwrite of a detail row.
    fn put_detail(&self, detail: &TaskDetail) -> Result<(), String>;

    /// Blind partial update; never requires a prior read.
    fn update_summary(&self, key: &RunKey, update: &SummaryUpdate) -> Result<(), String>;

    /// Blind partial update; never requires a prior read.
    fn update_detail(&self, key: &TaskKey, update: &DetailUpdate) -> Result<(), String>;

    /// Every detail row of a run, read with strong consistency.
    fn query_details_by_run(&self, run_id: i64) -> Result<Vec<TaskDetail>, String>;

    fn get_summary(&self, key: &RunKey) -> Result<Option<RunSummary>, String>;
}
