use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use fanout_core::launcher::{TaskSubmission, TaskSubmitter};
use fanout_core::orchestrator::{Clock, Sleeper};
use fanout_core::records::TaskStatus;
use fanout_core::reporter::{report_task_outcome, TaskOutcome};
use fanout_core::store::StatusStore;

/// Fake execution backend: hands out sequential ARNs and remembers the
/// environment each unit was started with.
#[derive(Debug, Default)]
pub struct FakeBackend {
    submitted: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl FakeBackend {
    pub fn submitted(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.submitted.lock().expect("poisoned mutex").clone()
    }

    pub fn arn_for(task_name: &str) -> String {
        format!("arn:aws:ecs:us-east-1:123456789012:task/batch-cluster/{task_name}")
    }
}

impl TaskSubmitter for FakeBackend {
    fn submit_task(&self, submission: &TaskSubmission<'_>) -> Result<String, String> {
        let arn = Self::arn_for(&submission.unit.task_name);
        self.submitted
            .lock()
            .map_err(|_| "poisoned mutex".to_string())?
            .push((arn.clone(), submission.environment.clone()));
        Ok(arn)
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub fn morning() -> Self {
        Self(
            Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0)
                .single()
                .expect("valid timestamp"),
        )
    }
}

impl FixedClock {
    /// Run id the launcher derives from this clock.
    pub fn run_id(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Each sleep lets the next scripted work unit finish by reporting through
/// the store, the way a real worker container would.
pub struct WorkersFinishWhileSleeping<'a> {
    pub store: &'a dyn StatusStore,
    pub finishes: Mutex<Vec<(String, TaskStatus)>>,
    pub sleeps: Mutex<Vec<Duration>>,
    pub run_id: i64,
}

impl<'a> WorkersFinishWhileSleeping<'a> {
    pub fn new(
        store: &'a dyn StatusStore,
        run_id: i64,
        finishes: Vec<(&str, TaskStatus)>,
    ) -> Self {
        Self {
            store,
            finishes: Mutex::new(
                finishes
                    .into_iter()
                    .map(|(name, status)| (FakeBackend::arn_for(name), status))
                    .collect(),
            ),
            sleeps: Mutex::new(Vec::new()),
            run_id,
        }
    }

    pub fn sleep_count(&self) -> usize {
        self.sleeps.lock().expect("poisoned mutex").len()
    }
}

impl Sleeper for WorkersFinishWhileSleeping<'_> {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("poisoned mutex").push(duration);
        let mut finishes = self.finishes.lock().expect("poisoned mutex");
        if finishes.is_empty() {
            return;
        }
        let (task_id, status) = finishes.remove(0);
        let start = FixedClock::morning().0;
        let outcome = TaskOutcome {
            status,
            started_at: start,
            finished_at: start + chrono::Duration::seconds(90),
        };
        report_task_outcome(self.store, self.run_id, &task_id, &outcome).expect("report outcome");
    }
}
