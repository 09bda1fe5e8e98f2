//! Run-time configuration for the `loomworks` binary.
//!
//! Loaded once at process start from `.loomworks/config.toml` (or the path
//! given with `--config`) and treated as read-only from then on: the driver
//! receives everything it needs explicitly, so concurrent drivers over
//! different tasks can share one configuration without locking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use llm::{backend_from_config, BackendConfig};
use pipeline::{Backend, RetryLimits, RoleBackends, Templates};

/// Default configuration path relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".loomworks/config.toml";

/// Backend names assigned to the pipeline roles.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleAssignments {
    /// Backend that produces designs.
    pub design: String,
    /// Backend that produces implementations.
    pub implement: String,
    /// Stronger backend used when retries exhaust or a failure is complex.
    pub escalate: String,
}

/// Optional external collaborator commands.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Collaborators {
    /// Command that exercises an implementation (reads it on stdin; exit 0
    /// means pass, anything else fail with error-class labels on stdout).
    #[serde(default)]
    pub test_command: Option<String>,
    /// Command that reviews an implementation (reads it on stdin; exit 0
    /// means approved).
    #[serde(default)]
    pub review_command: Option<String>,
}

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory for per-task state and artifacts.
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,
    /// Directory holding `design.md` and `implementation.md` templates.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    /// Retry and escalation bounds applied to new tasks.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Every configured backend.
    pub backends: Vec<BackendConfig>,
    /// Which backend serves which role.
    pub roles: RoleAssignments,
    /// External test/review commands.
    #[serde(default)]
    pub collaborators: Collaborators,
}

/// Serde mirror of [`RetryLimits`] with file-level defaults.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_escalations")]
    pub max_escalations: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_escalations: default_max_escalations(),
        }
    }
}

fn default_runs_dir() -> PathBuf {
    PathBuf::from("runs")
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_escalations() -> u32 {
    1
}

impl Config {
    /// Reads and parses the configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration at {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("invalid configuration at {}", path.display()))?;
        Ok(config)
    }

    /// The retry bounds as the domain type.
    pub fn retry_limits(&self) -> RetryLimits {
        RetryLimits {
            max_retries: self.limits.max_retries,
            max_escalations: self.limits.max_escalations,
        }
    }

    /// Builds every configured backend and resolves the role assignments.
    ///
    /// Configuration problems (duplicate or unknown names, empty connection
    /// parameters) fail here, before any task is touched.
    pub fn role_backends(&self) -> Result<RoleBackends> {
        let mut by_name: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        for backend_config in &self.backends {
            if by_name.contains_key(&backend_config.name) {
                bail!("duplicate backend name '{}'", backend_config.name);
            }
            let backend = backend_from_config(backend_config)
                .with_context(|| format!("invalid backend '{}'", backend_config.name))?;
            by_name.insert(backend_config.name.clone(), backend);
        }

        let resolve = |role: &str, name: &String| -> Result<Arc<dyn Backend>> {
            by_name.get(name).cloned().with_context(|| {
                format!("role '{role}' references unknown backend '{name}'")
            })
        };

        Ok(RoleBackends {
            design: resolve("design", &self.roles.design)?,
            implement: resolve("implement", &self.roles.implement)?,
            escalate: resolve("escalate", &self.roles.escalate)?,
        })
    }

    /// Reads the prompt templates from the templates directory.
    ///
    /// `design.md` and `implementation.md` are required; `system.md` is
    /// optional and, when present, is attached to every invocation as the
    /// system prompt.
    pub fn templates(&self) -> Result<Templates> {
        let read = |stem: &str| -> Result<String> {
            let path = self.templates_dir.join(format!("{stem}.md"));
            std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read template {}", path.display()))
        };
        let system = match std::fs::read_to_string(self.templates_dir.join("system.md")) {
            Ok(text) => Some(text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "cannot read template {}",
                        self.templates_dir.join("system.md").display()
                    )
                })
            }
        };
        Ok(Templates {
            design: read("design")?,
            implementation: read("implementation")?,
            system,
        })
    }
}
