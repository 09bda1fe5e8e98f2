//! File-backed state store.
//!
//! One record per task id at `runs/<task-id>/state.json`, serialised as
//! pretty-printed JSON. Every update is a full read-validate-modify-write;
//! the write lands in a `.tmp` sibling first and is renamed over the record,
//! which is atomic for the single concurrent writer the store assumes per
//! task id. Records for different task ids are independent files and need no
//! coordination.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use pipeline::{
    BackendName, Phase, RetryLimits, StateError, StateStore, TaskId, TaskState,
};

const STATE_FILE: &str = "state.json";

/// [`StateStore`] over one JSON file per task under a runs root.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    runs_dir: PathBuf,
}

impl FileStateStore {
    /// Creates a store rooted at `runs_dir`. The directory is created lazily
    /// on the first write.
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    fn state_path(&self, task_id: &TaskId) -> PathBuf {
        self.runs_dir.join(task_id.as_str()).join(STATE_FILE)
    }

    async fn read_record(&self, task_id: &TaskId) -> Result<TaskState, StateError> {
        let path = self.state_path(task_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::NotFound {
                    task_id: task_id.clone(),
                })
            }
            Err(err) => return Err(StateError::io(&err)),
        };
        serde_json::from_slice(&bytes).map_err(|err| StateError::Corrupt {
            path: path.display().to_string(),
            reason: err.to_string(),
        })
    }

    async fn write_record(&self, state: &TaskState) -> Result<(), StateError> {
        let path = self.state_path(&state.task_id);
        let json = serde_json::to_vec_pretty(state).map_err(|err| StateError::Io {
            message: err.to_string(),
        })?;
        write_atomic(&path, &json)
            .await
            .map_err(|err| StateError::io(&err))?;
        debug!(task = %state.task_id, phase = %state.phase, "state record written");
        Ok(())
    }
}

/// Writes `bytes` to a `.tmp` sibling and renames it over `path`.
///
/// A reader never observes a partially written file; the rename either
/// happened or it did not.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent directory"))?;
    tokio::fs::create_dir_all(parent).await?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn init(&self, task_id: &TaskId, limits: RetryLimits) -> Result<TaskState, StateError> {
        match self.read_record(task_id).await {
            Ok(_) => {
                return Err(StateError::AlreadyExists {
                    task_id: task_id.clone(),
                })
            }
            Err(StateError::NotFound { .. }) => {}
            // A corrupt record still means a record exists; refuse to reset it.
            Err(err) => return Err(err),
        }
        let state = TaskState::new(task_id.clone(), limits);
        self.write_record(&state).await?;
        Ok(state)
    }

    async fn load(&self, task_id: &TaskId) -> Result<TaskState, StateError> {
        self.read_record(task_id).await
    }

    async fn advance(
        &self,
        task_id: &TaskId,
        next: Phase,
        backend: Option<&BackendName>,
    ) -> Result<TaskState, StateError> {
        let mut state = self.read_record(task_id).await?;
        if !state.phase.can_transition_to(next) {
            // The stored record stays exactly as it was.
            return Err(StateError::InvalidTransition {
                from: state.phase,
                to: next,
            });
        }
        state.enter(next, backend.cloned());
        self.write_record(&state).await?;
        Ok(state)
    }

    async fn record_retry(&self, task_id: &TaskId) -> Result<TaskState, StateError> {
        let mut state = self.read_record(task_id).await?;
        state.retry_count += 1;
        self.write_record(&state).await?;
        Ok(state)
    }

    async fn record_escalation(
        &self,
        task_id: &TaskId,
        reason: &str,
    ) -> Result<TaskState, StateError> {
        let mut state = self.read_record(task_id).await?;
        state.escalation_count += 1;
        state.escalation_reasons.push(reason.to_string());
        self.write_record(&state).await?;
        Ok(state)
    }
}
