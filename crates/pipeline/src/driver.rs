//! The pipeline driver: sequencing, retry, and escalation.
//!
//! The driver runs a task through its ordered phases, invoking the correct
//! backend per phase, rendering the correct template, persisting every
//! transition through the state store, and applying the recovery policy on
//! failure. It depends only on the port traits in [`crate::ports`]; which
//! backends exist and how state reaches disk are infrastructure concerns.
//!
//! ## Recovery policy
//!
//! - Retryable invocation failures (timeouts, non-zero exits, 5xx) and
//!   all-minor test findings consume the minor-retry budget and re-attempt
//!   with the current backend.
//! - Non-retryable failures (malformed responses, empty output), complex
//!   test findings, review rejections, and retry exhaustion consume the
//!   escalation budget and switch to the escalation backend.
//! - Escalation exhaustion drives the task to `FAILED`. Nothing is deleted
//!   on failure: the state record keeps the full history and partial
//!   artifacts stay on disk for post-mortem inspection.

use std::sync::Arc;

use tracing::{info, warn};

use crate::template::{self, Bindings, ContextFile};
use crate::{
    ArtifactKind, ArtifactStore, Backend, BackendError, ErrorSeverity, InvocationRequest, Phase,
    PipelineError, RetryLimits, RetryPolicy, ReviewVerdict, Reviewer, StateError, StateStore,
    TaskId, TaskState, TestRunner, TestVerdict,
};

/// Placeholder name the design template binds the requirement text to.
pub const REQUIREMENT_PLACEHOLDER: &str = "requirement";

/// Placeholder name the implementation template binds the design text to.
pub const DESIGN_PLACEHOLDER: &str = "design";

/// The backends assigned to each pipeline role.
///
/// Configuration is loaded once at process start and injected here; the
/// driver never reads ambient global state, so independent drivers can run
/// concurrently over shared, read-only configuration.
#[derive(Clone)]
pub struct RoleBackends {
    /// Produces the design artifact.
    pub design: Arc<dyn Backend>,
    /// Produces the implementation artifact.
    pub implement: Arc<dyn Backend>,
    /// Stronger backend brought in when retries exhaust or a failure is
    /// complex.
    pub escalate: Arc<dyn Backend>,
}

/// The prompt templates for the generating phases.
#[derive(Debug, Clone)]
pub struct Templates {
    /// Template with a `{{requirement}}` placeholder.
    pub design: String,
    /// Template with a `{{design}}` placeholder.
    pub implementation: String,
    /// System prompt attached to every invocation, if configured.
    pub system: Option<String>,
}

/// Caller-selected run modifiers.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Enter directly at implementation, reusing an existing design
    /// artifact. Fatal if no design artifact exists for the task.
    pub skip_design: bool,
    /// Context files folded into every generated prompt.
    pub context: Vec<ContextFile>,
}

/// How a recovery attempt left the driver.
enum Recovery {
    /// Re-attempt the failed stage with the current backend.
    RetrySame,
    /// Re-attempt the failed stage with the escalation backend.
    Escalated,
}

/// Drives one task through the phase graph.
pub struct PipelineDriver {
    backends: RoleBackends,
    templates: Templates,
    state: Arc<dyn StateStore>,
    artifacts: Arc<dyn ArtifactStore>,
    tests: Arc<dyn TestRunner>,
    reviewer: Arc<dyn Reviewer>,
    limits: RetryLimits,
}

impl PipelineDriver {
    /// Creates a driver over the given ports.
    pub fn new(
        backends: RoleBackends,
        templates: Templates,
        state: Arc<dyn StateStore>,
        artifacts: Arc<dyn ArtifactStore>,
        tests: Arc<dyn TestRunner>,
        reviewer: Arc<dyn Reviewer>,
        limits: RetryLimits,
    ) -> Self {
        Self {
            backends,
            templates,
            state,
            artifacts,
            tests,
            reviewer,
            limits,
        }
    }

    /// Runs `task_id` through every remaining phase.
    ///
    /// `requirement` is required for a fresh run; a resumed run reads its
    /// inputs from the artifact store instead. On success the returned state
    /// is at [`Phase::Completed`]; on a fatal condition the state is left at
    /// [`Phase::Failed`] (where the graph permits) and the error describes
    /// the final straw.
    pub async fn run(
        &self,
        task_id: &TaskId,
        requirement: Option<&str>,
        options: RunOptions,
    ) -> Result<TaskState, PipelineError> {
        let mut state = match self.state.load(task_id).await {
            Ok(state) => state,
            Err(StateError::NotFound { .. }) => self.state.init(task_id, self.limits).await?,
            Err(err) => return Err(err.into()),
        };

        if state.phase.is_terminal() {
            return Err(PipelineError::AlreadyFinished {
                task_id: task_id.clone(),
                phase: state.phase,
            });
        }
        if !matches!(state.phase, Phase::Init | Phase::Designed) {
            return Err(PipelineError::UnsupportedResume {
                task_id: task_id.clone(),
                phase: state.phase,
            });
        }

        info!(task = %task_id, phase = %state.phase, "starting pipeline run");

        let design = self
            .obtain_design(task_id, &mut state, requirement, &options)
            .await?;
        self.implement_and_validate(task_id, &mut state, &design, &options.context)
            .await?;

        info!(task = %task_id, "pipeline run completed");
        Ok(state)
    }

    /// Produces (or re-uses) the design artifact, leaving the task at
    /// [`Phase::Designed`].
    async fn obtain_design(
        &self,
        task_id: &TaskId,
        state: &mut TaskState,
        requirement: Option<&str>,
        options: &RunOptions,
    ) -> Result<String, PipelineError> {
        if options.skip_design {
            let design = self
                .artifacts
                .read(task_id, ArtifactKind::Design)
                .await?
                .ok_or_else(|| PipelineError::MissingArtifact {
                    task_id: task_id.clone(),
                    kind: ArtifactKind::Design,
                })?;
            if state.phase == Phase::Init {
                // The skip-design resume edge; legal because the artifact
                // was just verified to exist.
                *state = self.state.advance(task_id, Phase::Designed, None).await?;
            }
            info!(task = %task_id, "design phase skipped; reusing existing artifact");
            return Ok(design);
        }

        if state.phase == Phase::Designed {
            if let Some(design) = self.artifacts.read(task_id, ArtifactKind::Design).await? {
                info!(task = %task_id, "resuming with existing design artifact");
                return Ok(design);
            }
            return Err(PipelineError::MissingArtifact {
                task_id: task_id.clone(),
                kind: ArtifactKind::Design,
            });
        }

        let requirement = requirement
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| PipelineError::MissingRequirement {
                task_id: task_id.clone(),
            })?;
        self.artifacts
            .write(task_id, ArtifactKind::Requirement, requirement)
            .await?;

        let prompt = template::fold_context(
            &template::render(
                &self.templates.design,
                &Bindings::new().with(REQUIREMENT_PLACEHOLDER, requirement),
            ),
            &options.context,
        );
        let mut backend = Arc::clone(&self.backends.design);
        let design = self
            .produce(
                task_id,
                state,
                Phase::Designing,
                ArtifactKind::Design,
                &prompt,
                &mut backend,
            )
            .await?;
        *state = self.state.advance(task_id, Phase::Designed, None).await?;
        Ok(design)
    }

    /// Runs the implement → test → review cycle until approval or failure.
    async fn implement_and_validate(
        &self,
        task_id: &TaskId,
        state: &mut TaskState,
        design: &str,
        context: &[ContextFile],
    ) -> Result<(), PipelineError> {
        let prompt = template::fold_context(
            &template::render(
                &self.templates.implementation,
                &Bindings::new().with(DESIGN_PLACEHOLDER, design),
            ),
            context,
        );

        // The backend in play survives the whole implement → test → review
        // cycle: once escalated, re-attempts stay on the stronger backend.
        let mut backend = Arc::clone(&self.backends.implement);
        loop {
            let implementation = self
                .produce(
                    task_id,
                    state,
                    Phase::Implementing,
                    ArtifactKind::Implementation,
                    &prompt,
                    &mut backend,
                )
                .await?;

            *state = self.state.advance(task_id, Phase::Testing, None).await?;
            let report = self.tests.run(task_id, &implementation).await?;
            if report.verdict == TestVerdict::Fail {
                let severity = report.worst_severity();
                warn!(task = %task_id, ?severity, findings = report.findings.len(),
                    "tests failed");
                if let Recovery::Escalated = self
                    .recover(task_id, state, severity, "tests failed")
                    .await?
                {
                    backend = Arc::clone(&self.backends.escalate);
                }
                continue;
            }

            *state = self.state.advance(task_id, Phase::Reviewing, None).await?;
            let review = self.reviewer.review(task_id, &implementation).await?;
            match review.verdict {
                ReviewVerdict::Approved => {
                    *state = self.state.advance(task_id, Phase::Completed, None).await?;
                    return Ok(());
                }
                ReviewVerdict::Rejected => {
                    warn!(task = %task_id, notes = ?review.notes, "review rejected");
                    // A rejection means the output misses the point, which
                    // no mechanical re-attempt will fix.
                    if let Recovery::Escalated = self
                        .recover(task_id, state, ErrorSeverity::Complex, "review rejected")
                        .await?
                    {
                        backend = Arc::clone(&self.backends.escalate);
                    }
                    continue;
                }
            }
        }
    }

    /// Invokes the stage backend until it yields a non-empty artifact,
    /// applying the recovery policy between attempts.
    ///
    /// On return the task is in `work_phase` and the artifact is persisted.
    async fn produce(
        &self,
        task_id: &TaskId,
        state: &mut TaskState,
        work_phase: Phase,
        kind: ArtifactKind,
        prompt: &str,
        backend: &mut Arc<dyn Backend>,
    ) -> Result<String, PipelineError> {
        let mut request = InvocationRequest::new(prompt)?;
        if let Some(system) = &self.templates.system {
            request = request.with_system(system.clone());
        }

        loop {
            // Re-enter the work phase from wherever the last attempt left
            // us. Implementation is only reachable through DESIGNED.
            if work_phase == Phase::Implementing && state.phase != Phase::Designed {
                *state = self.state.advance(task_id, Phase::Designed, None).await?;
            }
            *state = self
                .state
                .advance(task_id, work_phase, Some(backend.name()))
                .await?;

            let failure = match backend.invoke(&request).await {
                Ok(output) if !output.text.trim().is_empty() => {
                    self.artifacts.write(task_id, kind, &output.text).await?;
                    info!(task = %task_id, backend = %backend.name(), phase = %work_phase,
                        elapsed_ms = output.elapsed.as_millis() as u64, "artifact produced");
                    return Ok(output.text);
                }
                // Empty output is indistinguishable from a malformed
                // response: escalate, do not burn minor retries.
                Ok(_) => BackendError::Response {
                    status: None,
                    reason: format!("backend '{}' produced empty output", backend.name()),
                },
                Err(err) if err.is_fatal() => {
                    self.mark_failed(task_id, state).await?;
                    return Err(err.into());
                }
                Err(err) => err,
            };

            warn!(task = %task_id, backend = %backend.name(), error = %failure,
                "backend invocation failed");
            let severity = match failure.retry_policy() {
                RetryPolicy::Retryable { .. } => ErrorSeverity::Minor,
                RetryPolicy::NonRetryable => ErrorSeverity::Complex,
            };
            match self
                .recover(task_id, state, severity, &failure.to_string())
                .await?
            {
                Recovery::RetrySame => {}
                Recovery::Escalated => *backend = Arc::clone(&self.backends.escalate),
            }
        }
    }

    /// Routes a failure to retry, escalation, or terminal failure.
    ///
    /// Minor failures step through `RETRYING` and consume the retry budget;
    /// everything else (and retry exhaustion) lands in `ESCALATING`. An
    /// exhausted escalation budget drives the task to `FAILED` and surfaces
    /// [`PipelineError::EscalationExhausted`].
    async fn recover(
        &self,
        task_id: &TaskId,
        state: &mut TaskState,
        severity: ErrorSeverity,
        reason: &str,
    ) -> Result<Recovery, PipelineError> {
        if severity == ErrorSeverity::Minor {
            *state = self.state.advance(task_id, Phase::Retrying, None).await?;
            if state.can_retry() {
                *state = self.state.record_retry(task_id).await?;
                info!(task = %task_id, retry = state.retry_count,
                    max = state.limits.max_retries, "retrying with the same backend");
                return Ok(Recovery::RetrySame);
            }
        }

        // Complex failures skip the retry hub when the graph allows a
        // direct edge (TESTING/REVIEWING); otherwise pass through it.
        if state.phase != Phase::Retrying && !state.phase.can_transition_to(Phase::Escalating) {
            *state = self.state.advance(task_id, Phase::Retrying, None).await?;
        }
        *state = self
            .state
            .advance(
                task_id,
                Phase::Escalating,
                Some(self.backends.escalate.name()),
            )
            .await?;

        if !state.can_escalate() {
            *state = self.state.advance(task_id, Phase::Failed, None).await?;
            warn!(task = %task_id, "escalation exhausted; task failed");
            return Err(PipelineError::EscalationExhausted {
                task_id: task_id.clone(),
                last_error: reason.to_string(),
            });
        }
        *state = self.state.record_escalation(task_id, reason).await?;
        info!(task = %task_id, escalation = state.escalation_count,
            backend = %self.backends.escalate.name(), "escalating to stronger backend");
        Ok(Recovery::Escalated)
    }

    /// Walks the task to `FAILED` through legal edges after an unrecoverable
    /// error. The history keeps every step; nothing is deleted.
    async fn mark_failed(
        &self,
        task_id: &TaskId,
        state: &mut TaskState,
    ) -> Result<(), PipelineError> {
        if !state.phase.can_transition_to(Phase::Escalating) {
            *state = self.state.advance(task_id, Phase::Retrying, None).await?;
        }
        *state = self.state.advance(task_id, Phase::Escalating, None).await?;
        *state = self.state.advance(task_id, Phase::Failed, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        ArtifactError, BackendName, ErrorClass, InvocationOutput, ReviewReport, TestReport,
    };

    // -- test doubles -------------------------------------------------------

    /// Backend that replays a scripted sequence of results and panics on an
    /// unscripted invocation.
    #[derive(Debug)]
    struct ScriptedBackend {
        name: BackendName,
        script: Mutex<VecDeque<Result<String, BackendError>>>,
        calls: AtomicU32,
        seen: Mutex<Vec<(String, Option<String>)>>,
    }

    impl ScriptedBackend {
        fn new(name: &str, script: Vec<Result<String, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                name: BackendName::new(name).unwrap(),
                script: Mutex::new(script.into_iter().collect()),
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        /// The `(prompt, system)` pairs this backend was invoked with.
        fn seen(&self) -> Vec<(String, Option<String>)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        fn name(&self) -> &BackendName {
            &self.name
        }

        async fn invoke(
            &self,
            request: &InvocationRequest,
        ) -> Result<InvocationOutput, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((
                request.prompt().to_string(),
                request.system().map(str::to_string),
            ));
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("unscripted invocation of backend '{}'", self.name));
            next.map(|text| InvocationOutput {
                text,
                elapsed: Duration::from_millis(1),
            })
        }
    }

    /// In-memory state store enforcing the same transition rules as the
    /// file-backed one.
    #[derive(Default)]
    struct MemoryStateStore {
        records: Mutex<HashMap<String, TaskState>>,
    }

    #[async_trait]
    impl StateStore for MemoryStateStore {
        async fn init(
            &self,
            task_id: &TaskId,
            limits: RetryLimits,
        ) -> Result<TaskState, StateError> {
            let mut records = self.records.lock().unwrap();
            if records.contains_key(task_id.as_str()) {
                return Err(StateError::AlreadyExists {
                    task_id: task_id.clone(),
                });
            }
            let state = TaskState::new(task_id.clone(), limits);
            records.insert(task_id.as_str().to_string(), state.clone());
            Ok(state)
        }

        async fn load(&self, task_id: &TaskId) -> Result<TaskState, StateError> {
            self.records
                .lock()
                .unwrap()
                .get(task_id.as_str())
                .cloned()
                .ok_or_else(|| StateError::NotFound {
                    task_id: task_id.clone(),
                })
        }

        async fn advance(
            &self,
            task_id: &TaskId,
            next: Phase,
            backend: Option<&BackendName>,
        ) -> Result<TaskState, StateError> {
            let mut records = self.records.lock().unwrap();
            let state = records.get_mut(task_id.as_str()).ok_or_else(|| {
                StateError::NotFound {
                    task_id: task_id.clone(),
                }
            })?;
            if !state.phase.can_transition_to(next) {
                return Err(StateError::InvalidTransition {
                    from: state.phase,
                    to: next,
                });
            }
            state.enter(next, backend.cloned());
            Ok(state.clone())
        }

        async fn record_retry(&self, task_id: &TaskId) -> Result<TaskState, StateError> {
            let mut records = self.records.lock().unwrap();
            let state = records.get_mut(task_id.as_str()).unwrap();
            state.retry_count += 1;
            Ok(state.clone())
        }

        async fn record_escalation(
            &self,
            task_id: &TaskId,
            reason: &str,
        ) -> Result<TaskState, StateError> {
            let mut records = self.records.lock().unwrap();
            let state = records.get_mut(task_id.as_str()).unwrap();
            state.escalation_count += 1;
            state.escalation_reasons.push(reason.to_string());
            Ok(state.clone())
        }
    }

    #[derive(Default)]
    struct MemoryArtifactStore {
        files: Mutex<HashMap<(String, ArtifactKind), String>>,
    }

    #[async_trait]
    impl ArtifactStore for MemoryArtifactStore {
        async fn write(
            &self,
            task_id: &TaskId,
            kind: ArtifactKind,
            text: &str,
        ) -> Result<(), ArtifactError> {
            self.files
                .lock()
                .unwrap()
                .insert((task_id.as_str().to_string(), kind), text.to_string());
            Ok(())
        }

        async fn read(
            &self,
            task_id: &TaskId,
            kind: ArtifactKind,
        ) -> Result<Option<String>, ArtifactError> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .get(&(task_id.as_str().to_string(), kind))
                .cloned())
        }

        async fn exists(
            &self,
            task_id: &TaskId,
            kind: ArtifactKind,
        ) -> Result<bool, ArtifactError> {
            Ok(self.read(task_id, kind).await?.is_some())
        }
    }

    /// Test runner replaying scripted reports; passes once the script runs out.
    #[derive(Default)]
    struct ScriptedRunner {
        reports: Mutex<VecDeque<TestReport>>,
    }

    impl ScriptedRunner {
        fn failing_with(reports: Vec<TestReport>) -> Arc<Self> {
            Arc::new(Self {
                reports: Mutex::new(reports.into_iter().collect()),
            })
        }
    }

    #[async_trait]
    impl TestRunner for ScriptedRunner {
        async fn run(
            &self,
            _task_id: &TaskId,
            _implementation: &str,
        ) -> Result<TestReport, PipelineError> {
            Ok(self
                .reports
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(TestReport::pass))
        }
    }

    /// Reviewer that approves everything.
    struct ApproveAll;

    #[async_trait]
    impl Reviewer for ApproveAll {
        async fn review(
            &self,
            _task_id: &TaskId,
            _implementation: &str,
        ) -> Result<ReviewReport, PipelineError> {
            Ok(ReviewReport {
                verdict: ReviewVerdict::Approved,
                notes: None,
            })
        }
    }

    // -- harness ------------------------------------------------------------

    struct Harness {
        design: Arc<ScriptedBackend>,
        implement: Arc<ScriptedBackend>,
        escalate: Arc<ScriptedBackend>,
        state: Arc<MemoryStateStore>,
        artifacts: Arc<MemoryArtifactStore>,
        runner: Arc<ScriptedRunner>,
        limits: RetryLimits,
        system: Option<String>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                design: ScriptedBackend::new("design-cli", vec![Ok("the design".into())]),
                implement: ScriptedBackend::new("impl-cli", vec![Ok("the implementation".into())]),
                escalate: ScriptedBackend::new("big-model", vec![]),
                state: Arc::new(MemoryStateStore::default()),
                artifacts: Arc::new(MemoryArtifactStore::default()),
                runner: Arc::new(ScriptedRunner::default()),
                limits: RetryLimits::default(),
                system: None,
            }
        }

        fn driver(&self) -> PipelineDriver {
            PipelineDriver::new(
                RoleBackends {
                    design: self.design.clone(),
                    implement: self.implement.clone(),
                    escalate: self.escalate.clone(),
                },
                Templates {
                    design: "Design for: {{requirement}}".to_string(),
                    implementation: "Implement: {{design}}".to_string(),
                    system: self.system.clone(),
                },
                self.state.clone(),
                self.artifacts.clone(),
                self.runner.clone(),
                Arc::new(ApproveAll),
                self.limits,
            )
        }
    }

    fn task(id: &str) -> TaskId {
        TaskId::new(id).unwrap()
    }

    fn phases(state: &TaskState) -> Vec<Phase> {
        state.history.iter().map(|h| h.phase).collect()
    }

    // -- scenarios ----------------------------------------------------------

    #[tokio::test]
    async fn happy_path_runs_every_phase_to_completed() {
        let harness = Harness::new();
        let state = harness
            .driver()
            .run(&task("demo-1"), Some("add two numbers"), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.history.last().unwrap().phase, Phase::Completed);
        assert_eq!(
            phases(&state),
            vec![
                Phase::Init,
                Phase::Designing,
                Phase::Designed,
                Phase::Implementing,
                Phase::Testing,
                Phase::Reviewing,
                Phase::Completed,
            ]
        );

        let id = task("demo-1");
        let design = harness
            .artifacts
            .read(&id, ArtifactKind::Design)
            .await
            .unwrap();
        assert_eq!(design.as_deref(), Some("the design"));
        let implementation = harness
            .artifacts
            .read(&id, ArtifactKind::Implementation)
            .await
            .unwrap();
        assert_eq!(implementation.as_deref(), Some("the implementation"));
    }

    #[tokio::test]
    async fn history_records_the_backend_per_attempt() {
        let harness = Harness::new();
        let state = harness
            .driver()
            .run(&task("demo-1"), Some("req"), RunOptions::default())
            .await
            .unwrap();

        let designing = state
            .history
            .iter()
            .find(|h| h.phase == Phase::Designing)
            .unwrap();
        assert_eq!(designing.backend.as_ref().unwrap().as_str(), "design-cli");
        let implementing = state
            .history
            .iter()
            .find(|h| h.phase == Phase::Implementing)
            .unwrap();
        assert_eq!(implementing.backend.as_ref().unwrap().as_str(), "impl-cli");
    }

    #[tokio::test]
    async fn fresh_run_without_requirement_is_fatal() {
        let harness = Harness::new();
        let err = harness
            .driver()
            .run(&task("demo-1"), None, RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingRequirement { .. }));
    }

    #[tokio::test]
    async fn design_timeout_is_retried_with_the_same_backend() {
        let mut harness = Harness::new();
        harness.design = ScriptedBackend::new(
            "design-cli",
            vec![
                Err(BackendError::Timeout { limit_secs: 1 }),
                Ok("the design".into()),
            ],
        );

        let state = harness
            .driver()
            .run(&task("demo-1"), Some("req"), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.retry_count, 1);
        assert_eq!(state.escalation_count, 0);
        assert_eq!(harness.design.calls(), 2);
        assert_eq!(harness.escalate.calls(), 0);
        assert!(phases(&state).contains(&Phase::Retrying));
    }

    #[tokio::test]
    async fn server_errors_exhaust_retries_then_escalate() {
        // Three 500s in a row with a retry bound of 2: after the second
        // retry failure the driver must land in ESCALATING, not FAILED.
        let mut harness = Harness::new();
        harness.limits = RetryLimits {
            max_retries: 2,
            max_escalations: 1,
        };
        let http_500 = || BackendError::Response {
            status: Some(500),
            reason: "internal server error".into(),
        };
        harness.implement = ScriptedBackend::new(
            "impl-http",
            vec![Err(http_500()), Err(http_500()), Err(http_500())],
        );
        harness.escalate = ScriptedBackend::new("big-model", vec![Ok("rescued".into())]);

        let state = harness
            .driver()
            .run(&task("demo-1"), Some("req"), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.retry_count, 2);
        assert_eq!(state.escalation_count, 1);
        assert_eq!(harness.implement.calls(), 3);
        assert_eq!(harness.escalate.calls(), 1);
        assert!(phases(&state).contains(&Phase::Escalating));

        let implementation = harness
            .artifacts
            .read(&task("demo-1"), ArtifactKind::Implementation)
            .await
            .unwrap();
        assert_eq!(implementation.as_deref(), Some("rescued"));
    }

    #[tokio::test]
    async fn malformed_response_escalates_without_burning_retries() {
        let mut harness = Harness::new();
        harness.implement = ScriptedBackend::new(
            "impl-http",
            vec![Err(BackendError::Response {
                status: None,
                reason: "missing choices[0].message.content".into(),
            })],
        );
        harness.escalate = ScriptedBackend::new("big-model", vec![Ok("rescued".into())]);

        let state = harness
            .driver()
            .run(&task("demo-1"), Some("req"), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.escalation_count, 1);
    }

    #[tokio::test]
    async fn empty_output_is_treated_as_a_response_failure() {
        let mut harness = Harness::new();
        harness.implement = ScriptedBackend::new("impl-cli", vec![Ok("   \n".into())]);
        harness.escalate = ScriptedBackend::new("big-model", vec![Ok("rescued".into())]);

        let state = harness
            .driver()
            .run(&task("demo-1"), Some("req"), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.escalation_count, 1);
    }

    #[tokio::test]
    async fn minor_test_findings_retry_with_the_same_backend() {
        let mut harness = Harness::new();
        harness.implement = ScriptedBackend::new(
            "impl-cli",
            vec![Ok("first try".into()), Ok("second try".into())],
        );
        harness.runner = ScriptedRunner::failing_with(vec![TestReport::fail(vec![
            ErrorClass::SyntaxError,
            ErrorClass::TypeError,
        ])]);

        let state = harness
            .driver()
            .run(&task("demo-1"), Some("req"), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.retry_count, 1);
        assert_eq!(state.escalation_count, 0);
        assert_eq!(harness.implement.calls(), 2);
        assert_eq!(harness.escalate.calls(), 0);
    }

    #[tokio::test]
    async fn complex_test_findings_escalate_without_touching_retry_count() {
        let mut harness = Harness::new();
        harness.runner =
            ScriptedRunner::failing_with(vec![TestReport::fail(vec![ErrorClass::LogicError])]);
        harness.escalate = ScriptedBackend::new("big-model", vec![Ok("rethought".into())]);

        let state = harness
            .driver()
            .run(&task("demo-1"), Some("req"), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.escalation_count, 1);
        assert_eq!(harness.implement.calls(), 1);
        assert_eq!(harness.escalate.calls(), 1);
    }

    #[tokio::test]
    async fn escalation_exhaustion_fails_the_task_with_full_history() {
        let mut harness = Harness::new();
        let malformed = || BackendError::Response {
            status: None,
            reason: "garbage body".into(),
        };
        harness.implement = ScriptedBackend::new("impl-http", vec![Err(malformed())]);
        harness.escalate = ScriptedBackend::new("big-model", vec![Err(malformed())]);

        let err = harness
            .driver()
            .run(&task("demo-1"), Some("req"), RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::EscalationExhausted { .. }));

        let state = harness.state.load(&task("demo-1")).await.unwrap();
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.history.last().unwrap().phase, Phase::Failed);
        // Partial artifacts survive for the post-mortem.
        assert!(harness
            .artifacts
            .exists(&task("demo-1"), ArtifactKind::Requirement)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn skip_design_without_artifact_is_fatal() {
        let harness = Harness::new();
        let err = harness
            .driver()
            .run(
                &task("demo-1"),
                None,
                RunOptions {
                    skip_design: true,
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingArtifact {
                kind: ArtifactKind::Design,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn skip_design_reuses_the_existing_artifact() {
        let harness = Harness::new();
        let id = task("demo-1");
        harness
            .artifacts
            .write(&id, ArtifactKind::Design, "design from a previous run")
            .await
            .unwrap();

        let state = harness
            .driver()
            .run(
                &id,
                None,
                RunOptions {
                    skip_design: true,
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(state.phase, Phase::Completed);
        // The design backend is never touched on a skip-design run.
        assert_eq!(harness.design.calls(), 0);
        assert_eq!(
            phases(&state),
            vec![
                Phase::Init,
                Phase::Designed,
                Phase::Implementing,
                Phase::Testing,
                Phase::Reviewing,
                Phase::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn context_files_are_folded_into_every_generated_prompt() {
        let harness = Harness::new();
        let options = RunOptions {
            skip_design: false,
            context: vec![ContextFile {
                name: "notes.md".to_string(),
                text: "remember the edge cases".to_string(),
            }],
        };
        harness
            .driver()
            .run(&task("demo-1"), Some("req"), options)
            .await
            .unwrap();

        let (design_prompt, _) = &harness.design.seen()[0];
        assert!(design_prompt.starts_with("Context files:"));
        assert!(design_prompt.contains("--- File: notes.md ---"));
        assert!(design_prompt.ends_with("User request:\nDesign for: req"));

        let (impl_prompt, _) = &harness.implement.seen()[0];
        assert!(impl_prompt.contains("remember the edge cases"));
        assert!(impl_prompt.ends_with("User request:\nImplement: the design"));
    }

    #[tokio::test]
    async fn configured_system_prompt_reaches_every_backend() {
        let mut harness = Harness::new();
        harness.system = Some("you are terse".to_string());
        harness
            .driver()
            .run(&task("demo-1"), Some("req"), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(harness.design.seen()[0].1.as_deref(), Some("you are terse"));
        assert_eq!(
            harness.implement.seen()[0].1.as_deref(),
            Some("you are terse")
        );
    }

    #[tokio::test]
    async fn rerunning_a_completed_task_is_rejected() {
        let harness = Harness::new();
        let id = task("demo-1");
        harness
            .driver()
            .run(&id, Some("req"), RunOptions::default())
            .await
            .unwrap();

        let err = harness
            .driver()
            .run(&id, Some("req"), RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyFinished { .. }));
    }
}
