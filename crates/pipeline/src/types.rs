//! Shared value types for the LoomWorks pipeline domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. the [`Phase`] graph admits only a
//! fixed set of edges, task history is append-only) and participate in domain
//! computations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BackendName, TaskId};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Phase state machine
// ---------------------------------------------------------------------------

/// A stage in a task's lifecycle.
///
/// The variants form a fixed, totally ordered vocabulary; the legal edges
/// between them are defined by [`Phase::allowed_transitions`]. Serialised in
/// SCREAMING_SNAKE_CASE to match the on-disk `state.json` vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Fresh task; nothing has run yet.
    Init,
    /// The design backend is producing the design artifact.
    Designing,
    /// A design artifact exists; implementation may begin.
    Designed,
    /// The implementation backend is producing the implementation artifact.
    Implementing,
    /// The implementation is being exercised by the external test runner.
    Testing,
    /// The implementation is under external review.
    Reviewing,
    /// A recoverable failure occurred; the same backend will be re-attempted.
    Retrying,
    /// Minor retries are exhausted (or the failure is complex); a stronger
    /// backend is being brought in.
    Escalating,
    /// Terminal: every driven phase finished successfully.
    Completed,
    /// Terminal: escalation was exhausted without success.
    Failed,
}

impl Phase {
    /// Returns `true` for [`Phase::Completed`] and [`Phase::Failed`].
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// Returns the set of phases this phase may legally transition to.
    ///
    /// `Init -> Designed` is the skip-design resume edge; the driver only
    /// takes it after verifying that a design artifact already exists.
    pub fn allowed_transitions(self) -> &'static [Phase] {
        use Phase::*;
        match self {
            Init => &[Designing, Designed],
            Designing => &[Designed, Retrying],
            Designed => &[Implementing],
            Implementing => &[Testing, Retrying],
            Testing => &[Reviewing, Retrying, Escalating],
            Reviewing => &[Completed, Escalating],
            Retrying => &[Designing, Designed, Escalating],
            Escalating => &[Designing, Designed, Failed],
            Completed => &[],
            Failed => &[],
        }
    }

    /// Returns `true` if `self -> to` is an edge of the phase graph.
    pub fn can_transition_to(self, to: Phase) -> bool {
        self.allowed_transitions().contains(&to)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Init => "INIT",
            Phase::Designing => "DESIGNING",
            Phase::Designed => "DESIGNED",
            Phase::Implementing => "IMPLEMENTING",
            Phase::Testing => "TESTING",
            Phase::Reviewing => "REVIEWING",
            Phase::Retrying => "RETRYING",
            Phase::Escalating => "ESCALATING",
            Phase::Completed => "COMPLETED",
            Phase::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// The kind of text artifact a phase produces.
///
/// Artifacts are identified by `(task id, kind)`; each kind maps 1:1 to the
/// phase that produces it, written once per phase execution and immutable
/// until that phase is re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The caller-supplied requirement text, recorded for post-mortems.
    Requirement,
    /// The design specification produced in [`Phase::Designing`].
    Design,
    /// The implementation produced in [`Phase::Implementing`].
    Implementation,
}

impl ArtifactKind {
    /// Returns the on-disk stem for this artifact (`design` -> `design.md`).
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Requirement => "requirement",
            ArtifactKind::Design => "design",
            ArtifactKind::Implementation => "implementation",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

/// Whether a failure class is auto-retried locally or escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Retried with the same (typically cheaper) backend, up to the
    /// configured attempt bound.
    Minor,
    /// Escalated to a stronger backend without touching the minor-retry
    /// counter.
    Complex,
}

/// A classified failure reported by the external test runner or reviewer.
///
/// The class determines the recovery route: minor classes are mechanical
/// mistakes the same backend usually fixes on a re-attempt; complex classes
/// indicate the output misses the point and a stronger backend is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    SyntaxError,
    ImportError,
    TypeError,
    NameError,
    LogicError,
    DesignMismatch,
    TestAmbiguity,
    RuntimeError,
}

impl ErrorClass {
    /// Parses an error-class label (`"syntax_error"`, `"logic_error"`, ...).
    ///
    /// Returns `None` for unrecognised labels; callers at the boundary treat
    /// those as complex, since retrying an unknown failure with the same
    /// backend is the less safe default.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "syntax_error" => Some(Self::SyntaxError),
            "import_error" => Some(Self::ImportError),
            "type_error" => Some(Self::TypeError),
            "name_error" => Some(Self::NameError),
            "logic_error" => Some(Self::LogicError),
            "design_mismatch" => Some(Self::DesignMismatch),
            "test_ambiguity" => Some(Self::TestAmbiguity),
            "runtime_error" => Some(Self::RuntimeError),
            _ => None,
        }
    }

    /// Returns the recovery severity of this class.
    pub fn severity(self) -> ErrorSeverity {
        match self {
            ErrorClass::SyntaxError
            | ErrorClass::ImportError
            | ErrorClass::TypeError
            | ErrorClass::NameError => ErrorSeverity::Minor,
            ErrorClass::LogicError
            | ErrorClass::DesignMismatch
            | ErrorClass::TestAmbiguity
            | ErrorClass::RuntimeError => ErrorSeverity::Complex,
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator reports
// ---------------------------------------------------------------------------

/// Pass/fail verdict from the external test runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestVerdict {
    Pass,
    Fail,
}

/// Result of handing an implementation artifact to the external test runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    /// Overall verdict.
    pub verdict: TestVerdict,
    /// Classified findings; empty on a pass.
    pub findings: Vec<ErrorClass>,
    /// Free-form runner output kept for post-mortems.
    pub summary: Option<String>,
}

impl TestReport {
    /// A passing report with no findings.
    pub fn pass() -> Self {
        Self {
            verdict: TestVerdict::Pass,
            findings: Vec::new(),
            summary: None,
        }
    }

    /// A failing report carrying the given findings.
    pub fn fail(findings: Vec<ErrorClass>) -> Self {
        Self {
            verdict: TestVerdict::Fail,
            findings,
            summary: None,
        }
    }

    /// Returns the worst severity across findings.
    ///
    /// A failing report with no classified findings counts as complex: there
    /// is nothing a mechanical re-attempt could target.
    pub fn worst_severity(&self) -> ErrorSeverity {
        if self.findings.is_empty() {
            return ErrorSeverity::Complex;
        }
        if self
            .findings
            .iter()
            .any(|f| f.severity() == ErrorSeverity::Complex)
        {
            ErrorSeverity::Complex
        } else {
            ErrorSeverity::Minor
        }
    }
}

/// Accept/reject verdict from the external reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    Rejected,
}

/// Result of handing an implementation artifact to the external reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReport {
    /// Overall verdict.
    pub verdict: ReviewVerdict,
    /// Reviewer notes kept for post-mortems.
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Task state
// ---------------------------------------------------------------------------

/// Retry and escalation bounds for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryLimits {
    /// Minor retries permitted before routing to escalation.
    pub max_retries: u32,
    /// Escalation attempts permitted before the task fails.
    pub max_escalations: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_escalations: 1,
        }
    }
}

/// One entry in a task's phase history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    /// The phase entered.
    pub phase: Phase,
    /// When the phase was entered.
    pub at: Timestamp,
    /// The backend attempted while in this phase, where one applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendName>,
}

/// The persisted record of a task's progress.
///
/// Owned exclusively by the driver for the duration of a run; persisted by the
/// state store between runs. The history is monotonically appended — entries
/// are never edited or reordered, so a failed run still shows every attempted
/// phase and backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    /// The task this record belongs to.
    pub task_id: TaskId,
    /// Current phase. At most one phase is active at a time.
    pub phase: Phase,
    /// Append-only record of every phase entered, oldest first.
    pub history: Vec<PhaseTransition>,
    /// Minor retries consumed so far.
    pub retry_count: u32,
    /// Escalation attempts consumed so far.
    pub escalation_count: u32,
    /// Reasons recorded for each escalation, oldest first.
    #[serde(default)]
    pub escalation_reasons: Vec<String>,
    /// Retry/escalation bounds this task was created with.
    pub limits: RetryLimits,
    /// When the record was created.
    pub created_at: Timestamp,
    /// When the record was last written.
    pub updated_at: Timestamp,
}

impl TaskState {
    /// Creates a fresh record in [`Phase::Init`] with empty history.
    pub fn new(task_id: TaskId, limits: RetryLimits) -> Self {
        let now = Timestamp::now();
        Self {
            task_id,
            phase: Phase::Init,
            history: vec![PhaseTransition {
                phase: Phase::Init,
                at: now,
                backend: None,
            }],
            retry_count: 0,
            escalation_count: 0,
            escalation_reasons: Vec::new(),
            limits,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a validated transition, appending to the history.
    ///
    /// The caller (the state store) is responsible for having checked the
    /// edge via [`Phase::can_transition_to`] first; this method only mutates.
    pub fn enter(&mut self, next: Phase, backend: Option<BackendName>) {
        let now = Timestamp::now();
        self.phase = next;
        self.history.push(PhaseTransition {
            phase: next,
            at: now,
            backend,
        });
        self.updated_at = now;
    }

    /// Returns `true` if another minor retry is within bounds.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.limits.max_retries
    }

    /// Returns `true` if another escalation attempt is within bounds.
    pub fn can_escalate(&self) -> bool {
        self.escalation_count < self.limits.max_escalations
    }
}
