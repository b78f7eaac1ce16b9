use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::records::{
    DetailUpdate, RunKey, RunStatus, RunSummary, SummaryUpdate, TaskDetail, TaskKey,
};
use crate::store::StatusStore;

/// Process-local status store.
///
/// Updates against missing rows create them, mirroring DynamoDB `UpdateItem`.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    summaries: Mutex<BTreeMap<RunKey, RunSummary>>,
    details: Mutex<BTreeMap<TaskKey, TaskDetail>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summaries(&self) -> Vec<RunSummary> {
        relock(&self.summaries).values().cloned().collect()
    }

    pub fn details(&self) -> Vec<TaskDetail> {
        relock(&self.details).values().cloned().collect()
    }

    pub fn detail(&self, key: &TaskKey) -> Option<TaskDetail> {
        relock(&self.details).get(key).cloned()
    }
}

impl StatusStore for InMemoryStatusStore {
    fn put_summary(&self, summary: &RunSummary) -> Result<(), String> {
        lock(&self.summaries)?.insert(summary.key(), summary.clone());
        Ok(())
    }

    fn put_detail(&self, detail: &TaskDetail) -> Result<(), String> {
        lock(&self.details)?.insert(detail.key(), detail.clone());
        Ok(())
    }

    fn update_summary(&self, key: &RunKey, update: &SummaryUpdate) -> Result<(), String> {
        let mut summaries = lock(&self.summaries)?;
        let row = summaries.entry(key.clone()).or_insert_with(|| RunSummary {
            workflow_name: key.workflow_name.clone(),
            run_id: key.run_id,
            spec_snapshot: String::new(),
            task_count: 0,
            status: RunStatus::Running,
            completed_count: 0,
            failed_count: 0,
            running_count: 0,
            start_time: String::new(),
            update_time: String::new(),
        });
        row.status = update.status;
        row.completed_count = update.completed_count;
        row.failed_count = update.failed_count;
        row.running_count = update.running_count;
        row.update_time = update.update_time.clone();
        Ok(())
    }

    fn update_detail(&self, key: &TaskKey, update: &DetailUpdate) -> Result<(), String> {
        let mut details = lock(&self.details)?;
        let row = details.entry(key.clone()).or_insert_with(|| TaskDetail {
            run_id: key.run_id,
            task_id: key.task_id.clone(),
            task_name: String::new(),
            status: String::new(),
            start_time: String::new(),
            update_time: String::new(),
            exec_duration_seconds: None,
        });
        row.status = update.status.as_str().to_string();
        row.update_time = update.update_time.clone();
        if update.exec_duration_seconds.is_some() {
            row.exec_duration_seconds = update.exec_duration_seconds;
        }
        Ok(())
    }

    fn query_details_by_run(&self, run_id: i64) -> Result<Vec<TaskDetail>, String> {
        Ok(lock(&self.details)?
            .values()
            .filter(|detail| detail.run_id == run_id)
            .cloned()
            .collect())
    }

    fn get_summary(&self, key: &RunKey) -> Result<Option<RunSummary>, String> {
        Ok(lock(&self.summaries)?.get(key).cloned())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, String> {
    mutex
        .lock()
        .map_err(|_| "in-memory status store lock poisoned".to_string())
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
