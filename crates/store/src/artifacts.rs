//! File-backed artifact store.
//!
//! One plain-text file per `(task id, kind)` at
//! `runs/<task-id>/artifacts/<kind>.md`. A write replaces the previous
//! artifact only when its phase is re-run, and always lands via
//! write-then-rename so a partially written artifact is never observable as
//! complete. Artifacts are never deleted — a failed run leaves everything in
//! place for post-mortem inspection.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use pipeline::{ArtifactError, ArtifactKind, ArtifactStore, TaskId};

use crate::state::write_atomic;

/// [`ArtifactStore`] over per-task artifact directories under a runs root.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    runs_dir: PathBuf,
}

impl FileArtifactStore {
    /// Creates a store rooted at `runs_dir` (the same root the state store
    /// uses).
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    fn artifact_path(&self, task_id: &TaskId, kind: ArtifactKind) -> PathBuf {
        self.runs_dir
            .join(task_id.as_str())
            .join("artifacts")
            .join(format!("{}.md", kind.as_str()))
    }

    fn io_error(
        task_id: &TaskId,
        kind: ArtifactKind,
        err: &std::io::Error,
    ) -> ArtifactError {
        ArtifactError::Io {
            task_id: task_id.clone(),
            kind,
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn write(
        &self,
        task_id: &TaskId,
        kind: ArtifactKind,
        text: &str,
    ) -> Result<(), ArtifactError> {
        let path = self.artifact_path(task_id, kind);
        write_atomic(&path, text.as_bytes())
            .await
            .map_err(|err| Self::io_error(task_id, kind, &err))?;
        debug!(task = %task_id, %kind, bytes = text.len(), "artifact written");
        Ok(())
    }

    async fn read(
        &self,
        task_id: &TaskId,
        kind: ArtifactKind,
    ) -> Result<Option<String>, ArtifactError> {
        match tokio::fs::read_to_string(self.artifact_path(task_id, kind)).await {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::io_error(task_id, kind, &err)),
        }
    }

    async fn exists(&self, task_id: &TaskId, kind: ArtifactKind) -> Result<bool, ArtifactError> {
        match tokio::fs::metadata(self.artifact_path(task_id, kind)).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Self::io_error(task_id, kind, &err)),
        }
    }
}
