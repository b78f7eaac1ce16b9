use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::contract::{IteratorPayload, LaunchRequest};
use crate::monitor::TaskTally;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Launch,
    Poll,
    Wait,
    Done,
}

/// Durable orchestrator state for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state: OrchestratorState,
    pub request: LaunchRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<IteratorPayload>,
    #[serde(default)]
    pub polls: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tally: Option<TaskTally>,
    /// Partial payloads of launches aborted by a submission failure. Their
    /// units were started and are not tracked by any later run id.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aborted_launches: Vec<IteratorPayload>,
}

impl Checkpoint {
    pub fn new(request: LaunchRequest) -> Self {
        Self {
            state: OrchestratorState::Launch,
            request,
            payload: None,
            polls: 0,
            last_error: None,
            tally: None,
            aborted_launches: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == OrchestratorState::Done
    }

    /// Every backend id started by an aborted launch of this checkpoint.
    pub fn orphaned_task_ids(&self) -> Vec<String> {
        self.aborted_launches
            .iter()
            .flat_map(|partial| partial.task_ids.iter().cloned())
            .collect()
    }
}

pub trait CheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, String>;
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), String>;
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    current: Mutex<Option<Checkpoint>>,
    history: Mutex<Vec<OrchestratorState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            current: Mutex::new(Some(checkpoint)),
            history: Mutex::new(Vec::new()),
        }
    }

    /// States in the order they were saved.
    pub fn saved_states(&self) -> Vec<OrchestratorState> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, String> {
        self.current
            .lock()
            .map(|slot| slot.clone())
            .map_err(|_| "checkpoint lock poisoned".to_string())
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), String> {
        *self
            .current
            .lock()
            .map_err(|_| "checkpoint lock poisoned".to_string())? = Some(checkpoint.clone());
        self.history
            .lock()
            .map_err(|_| "checkpoint lock poisoned".to_string())?
            .push(checkpoint.state);
        Ok(())
    }
}

/// JSON checkpoint on local disk. Saves go through a sibling temp file and a
/// rename so a crash never leaves a truncated checkpoint behind.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn staging_path(&self) -> PathBuf {
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        PathBuf::from(staging)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, String> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path).map_err(|error| {
            format!("failed to read checkpoint '{}': {error}", self.path.display())
        })?;
        serde_json::from_slice(&bytes).map(Some).map_err(|error| {
            format!("failed to parse checkpoint '{}': {error}", self.path.display())
        })
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), String> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "failed to create checkpoint directory '{}': {error}",
                    parent.display()
                )
            })?;
        }
        let body = serde_json::to_vec_pretty(checkpoint)
            .map_err(|error| format!("failed to serialize checkpoint: {error}"))?;
        let staging = self.staging_path();
        fs::write(&staging, body).map_err(|error| {
            format!("failed to write checkpoint '{}': {error}", staging.display())
        })?;
        fs::rename(&staging, &self.path).map_err(|error| {
            format!(
                "failed to move checkpoint into place at '{}': {error}",
                self.path.display()
            )
        })
    }
}
