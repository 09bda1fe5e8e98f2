//! Port trait definitions.
//!
//! The driver depends only on these traits; infrastructure crates (`llm`,
//! `store`) and test doubles provide the implementations. All traits are
//! `async` via `async-trait` so they stay dyn-compatible.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    ArtifactError, ArtifactKind, BackendError, BackendName, PipelineError, ReviewReport,
    RetryLimits, StateError, TaskId, TaskState, TestReport,
};

// ---------------------------------------------------------------------------
// Backend invocation
// ---------------------------------------------------------------------------

/// One invocation request against a backend.
///
/// Construction validates the prompt: an empty (or whitespace-only) prompt is
/// a configuration error, rejected before any process or network activity
/// can happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    prompt: String,
    system: Option<String>,
}

impl InvocationRequest {
    /// Creates a request, rejecting an empty prompt with
    /// [`BackendError::Config`].
    pub fn new(prompt: impl Into<String>) -> Result<Self, BackendError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(BackendError::Config {
                message: "prompt must be non-empty".to_string(),
            });
        }
        Ok(Self {
            prompt,
            system: None,
        })
    }

    /// Attaches a system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// The user prompt. Guaranteed non-empty.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// The system prompt, if any.
    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }
}

/// Successful result of one backend invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutput {
    /// The text the backend produced.
    pub text: String,
    /// Wall-clock time the invocation took.
    pub elapsed: Duration,
}

/// A reasoning backend: a named capability over `invoke(prompt) -> text`.
///
/// Implementations normalise their calling convention (process execution,
/// HTTP chat-completions) into this one contract; every failure is classified
/// into a [`BackendError`] before it returns — a raw transport error never
/// crosses this boundary. Every invocation is bounded by a hard wall-clock
/// timeout.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// The configured name of this backend.
    fn name(&self) -> &BackendName;

    /// Executes one invocation and returns the produced text.
    async fn invoke(&self, request: &InvocationRequest)
        -> Result<InvocationOutput, BackendError>;
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Durable record of a task's current phase and history.
///
/// One record per task id; single writer at a time. Writes to different task
/// ids are independent and require no coordination.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Creates a fresh record in `INIT` with empty history.
    ///
    /// Fails with [`StateError::AlreadyExists`] if a record already exists;
    /// the existing record (and its history) is never silently reset.
    async fn init(&self, task_id: &TaskId, limits: RetryLimits) -> Result<TaskState, StateError>;

    /// Loads the record for `task_id`, or [`StateError::NotFound`].
    async fn load(&self, task_id: &TaskId) -> Result<TaskState, StateError>;

    /// Validates `next` against the phase graph, appends it to the history,
    /// and persists the record atomically.
    ///
    /// An illegal transition fails with [`StateError::InvalidTransition`]
    /// and leaves the stored state unchanged. `backend` annotates which
    /// backend is being attempted in the new phase, where one applies.
    async fn advance(
        &self,
        task_id: &TaskId,
        next: crate::Phase,
        backend: Option<&BackendName>,
    ) -> Result<TaskState, StateError>;

    /// Increments the minor-retry counter.
    async fn record_retry(&self, task_id: &TaskId) -> Result<TaskState, StateError>;

    /// Increments the escalation counter and records the reason.
    async fn record_escalation(
        &self,
        task_id: &TaskId,
        reason: &str,
    ) -> Result<TaskState, StateError>;
}

/// Durable store of per-phase text artifacts.
///
/// One text file per `(task id, kind)` pair; a write replaces the previous
/// artifact only when its phase is re-run. Writes are atomic (write-then-
/// rename), so a partially written artifact is never observable as complete.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Atomically writes (or replaces) an artifact.
    async fn write(
        &self,
        task_id: &TaskId,
        kind: ArtifactKind,
        text: &str,
    ) -> Result<(), ArtifactError>;

    /// Reads an artifact, or `None` if it has not been produced yet.
    async fn read(
        &self,
        task_id: &TaskId,
        kind: ArtifactKind,
    ) -> Result<Option<String>, ArtifactError>;

    /// Returns `true` if the artifact exists.
    async fn exists(&self, task_id: &TaskId, kind: ArtifactKind) -> Result<bool, ArtifactError>;
}

// ---------------------------------------------------------------------------
// External collaborators
// ---------------------------------------------------------------------------

/// External collaborator that exercises an implementation artifact.
///
/// How tests are executed is outside this crate; the driver only consumes the
/// classified report.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Runs the task's tests against `implementation`.
    async fn run(
        &self,
        task_id: &TaskId,
        implementation: &str,
    ) -> Result<TestReport, PipelineError>;
}

/// External collaborator that reviews an implementation artifact.
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Reviews the task's implementation.
    async fn review(
        &self,
        task_id: &TaskId,
        implementation: &str,
    ) -> Result<ReviewReport, PipelineError>;
}
