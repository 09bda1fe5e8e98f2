//! Process-executed backend adapter.
//!
//! Spawns the configured executable with the prompt as its final argument and
//! captures standard output as the result text. The whole invocation is
//! bounded by a hard wall-clock timeout; on expiry the child is killed
//! (`kill_on_drop`) and the caller sees [`BackendError::Timeout`] — partial
//! stdout is never surfaced as a success.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use pipeline::{Backend, BackendError, BackendName, InvocationOutput, InvocationRequest};

/// A backend that shells out to a command-line agent.
#[derive(Debug)]
pub struct ProcessBackend {
    name: BackendName,
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessBackend {
    /// Creates a process-executed backend.
    ///
    /// An empty command is a configuration error, caught here rather than at
    /// first invocation.
    pub fn new(
        name: BackendName,
        command: impl Into<String>,
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(BackendError::Config {
                message: format!("backend '{name}' has an empty command"),
            });
        }
        Ok(Self {
            name,
            command,
            args,
            timeout,
        })
    }

    /// Folds an optional system prompt into the user prompt, the way the
    /// CLI agents expect it.
    fn compose_prompt(request: &InvocationRequest) -> String {
        match request.system() {
            Some(system) => format!("System: {system}\n\nUser: {}", request.prompt()),
            None => request.prompt().to_string(),
        }
    }
}

#[async_trait]
impl Backend for ProcessBackend {
    fn name(&self) -> &BackendName {
        &self.name
    }

    async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationOutput, BackendError> {
        let limit = self.timeout;
        let started = Instant::now();

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .arg(Self::compose_prompt(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(backend = %self.name, command = %self.command, timeout_secs = limit.as_secs(),
            "spawning process backend");

        let output = match tokio::time::timeout(limit, command.output()).await {
            // Dropping the future kills the child via kill_on_drop.
            Err(_) => {
                return Err(BackendError::Timeout {
                    limit_secs: limit.as_secs(),
                })
            }
            Ok(Err(err)) => {
                return Err(BackendError::Execution {
                    exit_code: -1,
                    stderr: format!("failed to spawn '{}': {err}", self.command),
                })
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(BackendError::Execution {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(InvocationOutput {
            text: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> BackendName {
        BackendName::new(n).unwrap()
    }

    #[test]
    fn empty_command_is_a_config_error() {
        let err = ProcessBackend::new(name("broken"), "  ", vec![], Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, BackendError::Config { .. }));
    }

    #[test]
    fn system_prompt_is_folded_into_the_argument() {
        let request = InvocationRequest::new("do it")
            .unwrap()
            .with_system("be brief");
        assert_eq!(
            ProcessBackend::compose_prompt(&request),
            "System: be brief\n\nUser: do it"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_of_a_successful_run() {
        let backend =
            ProcessBackend::new(name("echo"), "echo", vec![], Duration::from_secs(5)).unwrap();
        let request = InvocationRequest::new("hello backend").unwrap();
        let output = backend.invoke(&request).await.unwrap();
        assert_eq!(output.text, "hello backend");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_surfaces_code_and_stderr() {
        let backend = ProcessBackend::new(
            name("sh"),
            "sh",
            vec!["-c".to_string()],
            Duration::from_secs(5),
        )
        .unwrap();
        let request = InvocationRequest::new("echo oops >&2; exit 3").unwrap();
        let err = backend.invoke(&request).await.unwrap_err();
        match err {
            BackendError::Execution { exit_code, stderr } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "oops");
            }
            other => panic!("expected Execution, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exceeding_the_timeout_returns_timeout_not_partial_output() {
        // `sh -c` prints something, then sleeps past the bound; the partial
        // stdout must not come back as a success.
        let backend = ProcessBackend::new(
            name("sh"),
            "sh",
            vec!["-c".to_string()],
            Duration::from_millis(200),
        )
        .unwrap();
        let request = InvocationRequest::new("echo partial; sleep 5").unwrap();
        let err = backend.invoke(&request).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_executable_is_an_execution_error() {
        let backend = ProcessBackend::new(
            name("ghost"),
            "/definitely/not/a/real/executable",
            vec![],
            Duration::from_secs(1),
        )
        .unwrap();
        let request = InvocationRequest::new("hi").unwrap();
        let err = backend.invoke(&request).await.unwrap_err();
        assert!(matches!(err, BackendError::Execution { exit_code: -1, .. }));
    }
}
