//! Command-backed test runner and reviewer.
//!
//! Both collaborators are optional external programs configured in
//! `[collaborators]`. A configured command is run through `sh -c` with the
//! implementation artifact on stdin and the task id as `$1`; its exit status
//! carries the verdict. When no command is configured the collaborator
//! accepts everything, which keeps the pipeline usable before a project has
//! wired up its own tooling.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use pipeline::{
    BackendError, ErrorClass, PipelineError, ReviewReport, ReviewVerdict, Reviewer, TaskId,
    TestReport, TestRunner, TestVerdict,
};

/// Runs a configured command and returns `(success, stdout)`.
async fn run_command(
    command: &str,
    task_id: &TaskId,
    stdin_text: &str,
) -> Result<(bool, String), PipelineError> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .arg("sh")
        .arg(task_id.as_str())
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| command_failure(err.to_string()))?;

    // Take stdin before waiting so the pipe closes once we are done writing.
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| command_failure("collaborator stdin unavailable".to_string()))?;
    stdin
        .write_all(stdin_text.as_bytes())
        .await
        .map_err(|err| command_failure(err.to_string()))?;
    drop(stdin);

    let output = child
        .wait_with_output()
        .await
        .map_err(|err| command_failure(err.to_string()))?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok((output.status.success(), stdout))
}

fn command_failure(message: String) -> PipelineError {
    PipelineError::Backend(BackendError::Execution {
        exit_code: -1,
        stderr: message,
    })
}

/// Parses error-class labels out of a failing runner's output.
///
/// Each line is tried as a label (`syntax_error`, `logic_error`, ...); lines
/// that are not labels are kept only in the summary. No recognised label at
/// all leaves the findings empty, which the report counts as complex.
fn parse_findings(stdout: &str) -> Vec<ErrorClass> {
    stdout
        .lines()
        .filter_map(|line| ErrorClass::from_label(line.trim()))
        .collect()
}

// ---------------------------------------------------------------------------
// Test runner
// ---------------------------------------------------------------------------

/// [`TestRunner`] that delegates to a configured shell command.
pub struct CommandTestRunner {
    command: Option<String>,
}

impl CommandTestRunner {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(
        &self,
        task_id: &TaskId,
        implementation: &str,
    ) -> Result<TestReport, PipelineError> {
        let Some(command) = &self.command else {
            warn!(task = %task_id, "no test command configured, passing by default");
            return Ok(TestReport::pass());
        };

        let (success, stdout) = run_command(command, task_id, implementation).await?;
        if success {
            debug!(task = %task_id, "tests passed");
            return Ok(TestReport::pass());
        }

        let findings = parse_findings(&stdout);
        debug!(task = %task_id, ?findings, "tests failed");
        Ok(TestReport {
            verdict: TestVerdict::Fail,
            findings,
            summary: (!stdout.is_empty()).then(|| stdout),
        })
    }
}

// ---------------------------------------------------------------------------
// Reviewer
// ---------------------------------------------------------------------------

/// [`Reviewer`] that delegates to a configured shell command.
pub struct CommandReviewer {
    command: Option<String>,
}

impl CommandReviewer {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Reviewer for CommandReviewer {
    async fn review(
        &self,
        task_id: &TaskId,
        implementation: &str,
    ) -> Result<ReviewReport, PipelineError> {
        let Some(command) = &self.command else {
            warn!(task = %task_id, "no review command configured, approving by default");
            return Ok(ReviewReport {
                verdict: ReviewVerdict::Approved,
                notes: None,
            });
        };

        let (success, stdout) = run_command(command, task_id, implementation).await?;
        let verdict = if success {
            ReviewVerdict::Approved
        } else {
            ReviewVerdict::Rejected
        };
        debug!(task = %task_id, ?verdict, "review finished");
        Ok(ReviewReport {
            verdict,
            notes: (!stdout.is_empty()).then(|| stdout),
        })
    }
}
