//! Error and retry-policy types for the LoomWorks pipeline domain.
//!
//! Every infrastructure failure is classified into one of these types before
//! it crosses a port boundary — the invoker and the stores never let a raw
//! transport, process, or parse failure escape uninterpreted. The driver is
//! the only component that turns a classified error into a retry, an
//! escalation, or a terminal failure.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that
//! participates in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ArtifactKind, Phase, TaskId};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by infrastructure error types to let the driver decide whether to
/// re-invoke an operation without escalating.
///
/// ## Rules
///
/// - `Retryable` errors: invocation timeouts, non-zero process exits,
///   5xx responses from an HTTP-served backend.
/// - `NonRetryable` errors: invalid configuration, malformed or empty
///   response bodies, 4xx responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying.
    /// `None` means retry immediately or apply the caller's own back-off.
    Retryable {
        /// Minimum back-off before the next attempt.
        after: Option<Duration>,
    },
    /// The operation must not be retried; escalation or a terminal failure
    /// is required.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Backend invocation errors
// ---------------------------------------------------------------------------

/// Classified failure of a single backend invocation.
///
/// `invoke` never propagates a raw transport exception; every failure is one
/// of these variants before it reaches the driver.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum BackendError {
    /// The backend configuration is missing or invalid (empty executable
    /// path, empty endpoint, empty prompt). Fatal; never retried.
    #[error("Backend configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// The invocation exceeded its wall-clock bound. The in-flight call was
    /// cancelled; no partial output is surfaced.
    #[error("Backend invocation timed out after {limit_secs}s")]
    Timeout {
        /// The configured bound that was exceeded, in seconds.
        limit_secs: u64,
    },

    /// A process-executed backend exited with a non-zero status.
    #[error("Backend process exited with status {exit_code}: {stderr}")]
    Execution {
        /// Exit code reported by the process, or `-1` if it was killed by a
        /// signal.
        exit_code: i32,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// An HTTP-served backend returned an unusable response: a non-2xx
    /// status, an unparsable body, or a body whose expected content field is
    /// absent or null.
    #[error("Backend response error: {reason}")]
    Response {
        /// HTTP status, when the failure is a status-level one.
        status: Option<u16>,
        /// Description of what was wrong with the response.
        reason: String,
    },
}

impl BackendError {
    /// Returns the retry policy for this failure.
    ///
    /// Timeouts and process failures are transient; 5xx statuses are treated
    /// the same (the server failed, not the request). Malformed bodies and
    /// 4xx statuses will not improve on a re-attempt and must escalate.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            BackendError::Timeout { .. } | BackendError::Execution { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            BackendError::Response { status: Some(s), .. } if *s >= 500 => {
                RetryPolicy::Retryable { after: None }
            }
            BackendError::Response { .. } | BackendError::Config { .. } => {
                RetryPolicy::NonRetryable
            }
        }
    }

    /// Returns `true` for configuration errors, which abort the run outright.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::Config { .. })
    }
}

// ---------------------------------------------------------------------------
// State store errors
// ---------------------------------------------------------------------------

/// Failure of a state-store operation.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum StateError {
    /// No record exists for the task id.
    #[error("No state record for task '{task_id}'")]
    NotFound {
        /// The task id that was looked up.
        task_id: TaskId,
    },

    /// `init` was called for a task id that already has a record. The
    /// existing record (and its history) is left untouched.
    #[error("State record for task '{task_id}' already exists")]
    AlreadyExists {
        /// The task id that was initialised twice.
        task_id: TaskId,
    },

    /// The requested transition is not an edge of the phase graph. This is a
    /// driver bug, never silently ignored; the stored state is unchanged.
    #[error("Invalid phase transition {from} -> {to}")]
    InvalidTransition {
        /// The stored phase at the time of the request.
        from: Phase,
        /// The phase that was requested.
        to: Phase,
    },

    /// The stored record could not be parsed.
    #[error("Corrupt state record at {path}: {reason}")]
    Corrupt {
        /// Path of the offending file.
        path: String,
        /// Parse failure description.
        reason: String,
    },

    /// The underlying file operation failed.
    #[error("State store I/O failure: {message}")]
    Io {
        /// Description of the I/O failure.
        message: String,
    },
}

impl StateError {
    /// Wraps an I/O failure, keeping only the message (the record stays
    /// serialisable).
    pub fn io(err: &std::io::Error) -> Self {
        StateError::Io {
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact store errors
// ---------------------------------------------------------------------------

/// Failure of an artifact read or write.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ArtifactError {
    /// The underlying file operation failed.
    #[error("Artifact I/O failure for '{task_id}'/{kind}: {message}")]
    Io {
        /// The task the artifact belongs to.
        task_id: TaskId,
        /// Which artifact was being accessed.
        kind: ArtifactKind,
        /// Description of the I/O failure.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Template errors
// ---------------------------------------------------------------------------

/// Failure of a strict template render.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateError {
    /// A placeholder in the template has no binding.
    #[error("Unbound template placeholder '{{{{{name}}}}}'")]
    UnboundPlaceholder {
        /// The placeholder name that had no binding.
        name: String,
    },
}

// ---------------------------------------------------------------------------
// Pipeline-level errors
// ---------------------------------------------------------------------------

/// Errors that end a pipeline run.
///
/// Component failures (a single backend invocation, a single store write) are
/// recoverable and handled inside the driver's retry/escalation loop; these
/// variants are what remains when recovery is not possible or not permitted.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// A resume was requested without its prerequisite artifact
    /// (e.g. skip-design with no design on disk). Fatal.
    #[error("Missing {kind} artifact for task '{task_id}'; cannot resume")]
    MissingArtifact {
        /// The task being resumed.
        task_id: TaskId,
        /// The artifact that was expected to exist.
        kind: ArtifactKind,
    },

    /// A fresh run was started without requirement text.
    #[error("Task '{task_id}' has no requirement text")]
    MissingRequirement {
        /// The task that was started.
        task_id: TaskId,
    },

    /// The stored phase is not one the driver can resume from. Runs may
    /// start fresh from `INIT` or resume from `DESIGNED`; anything else means
    /// a previous run was interrupted mid-write or driven by other tooling.
    #[error("Task '{task_id}' cannot be resumed from phase {phase}")]
    UnsupportedResume {
        /// The task being resumed.
        task_id: TaskId,
        /// The stored phase that blocks the resume.
        phase: Phase,
    },

    /// The task is already in a terminal phase; there is nothing to drive.
    #[error("Task '{task_id}' already finished in phase {phase}")]
    AlreadyFinished {
        /// The task that was re-run.
        task_id: TaskId,
        /// Its terminal phase.
        phase: Phase,
    },

    /// Minor retries and escalation attempts are both exhausted. The state
    /// record is left at [`Phase::Failed`] with full history; partial
    /// artifacts stay on disk for post-mortem inspection.
    #[error("Task '{task_id}' failed: escalation exhausted ({last_error})")]
    EscalationExhausted {
        /// The failed task.
        task_id: TaskId,
        /// Description of the last failure observed.
        last_error: String,
    },

    /// A backend invocation failed fatally (configuration error).
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A state-store operation failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// An artifact-store operation failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}
