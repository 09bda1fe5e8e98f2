//! LoomWorks CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration** — load `.loomworks/config.toml` and validate it.
//! 2. **Wire observability** — configure `tracing-subscriber` from `RUST_LOG`,
//!    with an optional JSON layer for machine-readable logs. All `tracing`
//!    events emitted by every crate in the workspace flow through it.
//! 3. **Construct infrastructure** — build the configured backends, the
//!    file-backed state and artifact stores, and the command-backed
//!    collaborators, and inject them into [`pipeline::PipelineDriver`].
//! 4. **Dispatch the command** — `run` drives a task through the pipeline;
//!    `status` prints the persisted record for a task.
//!
//! Any failure surfaces as a non-zero exit status with the error chain on
//! stderr.

mod collaborators;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Instrument};
use tracing_subscriber::EnvFilter;

use pipeline::{ContextFile, PipelineDriver, PipelineRunId, RunOptions, StateStore, TaskId};
use store::{FileArtifactStore, FileStateStore};

use crate::collaborators::{CommandReviewer, CommandTestRunner};
use crate::config::{Config, DEFAULT_CONFIG_PATH};

#[derive(Debug, Parser)]
#[command(name = "loomworks", about = "Multi-stage content generation pipeline")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Run a task through every remaining pipeline phase.
    Run {
        /// Task identifier (also the per-task directory name).
        task_id: String,

        /// File holding the requirement text for a fresh task.
        #[arg(long)]
        requirement: Option<PathBuf>,

        /// Reuse an existing design artifact and start at implementation.
        #[arg(long)]
        skip_design: bool,

        /// File folded into every generated prompt as context (repeatable).
        #[arg(long = "context", value_name = "FILE")]
        context: Vec<PathBuf>,
    },
    /// Print the persisted state record for a task.
    Status {
        /// Task identifier.
        task_id: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_task_id(raw: &str) -> Result<TaskId> {
    TaskId::new(raw).context("task id must be non-empty")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = Config::load(&cli.config)?;

    match cli.command {
        CliCommand::Run {
            task_id,
            requirement,
            skip_design,
            context,
        } => run(&config, &task_id, requirement.as_deref(), skip_design, &context).await,
        CliCommand::Status { task_id } => status(&config, &task_id).await,
    }
}

/// Reads each context file, naming its block after the file name.
///
/// A missing or unreadable file aborts the run before any backend is touched.
fn load_context_files(paths: &[PathBuf]) -> Result<Vec<ContextFile>> {
    paths
        .iter()
        .map(|path| {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read context file {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(ContextFile { name, text })
        })
        .collect()
}

async fn run(
    config: &Config,
    task_id: &str,
    requirement_path: Option<&std::path::Path>,
    skip_design: bool,
    context_paths: &[PathBuf],
) -> Result<()> {
    let task_id = parse_task_id(task_id)?;

    let requirement = match requirement_path {
        Some(path) => Some(std::fs::read_to_string(path).with_context(|| {
            format!("cannot read requirement file {}", path.display())
        })?),
        None => None,
    };
    let context = load_context_files(context_paths)?;

    let driver = PipelineDriver::new(
        config.role_backends()?,
        config.templates()?,
        Arc::new(FileStateStore::new(&config.runs_dir)),
        Arc::new(FileArtifactStore::new(&config.runs_dir)),
        Arc::new(CommandTestRunner::new(
            config.collaborators.test_command.clone(),
        )),
        Arc::new(CommandReviewer::new(
            config.collaborators.review_command.clone(),
        )),
        config.retry_limits(),
    );

    // One run id per CLI invocation; the span correlates every event of this
    // run even when the same task is resumed later.
    let run_id = PipelineRunId::new_random();
    let span = tracing::info_span!("pipeline_run", run = %run_id, task = %task_id);
    let state = driver
        .run(&task_id, requirement.as_deref(), RunOptions { skip_design, context })
        .instrument(span)
        .await
        .with_context(|| format!("pipeline run failed for task '{task_id}'"))?;

    info!(
        task = %task_id,
        phase = %state.phase,
        retries = state.retry_count,
        escalations = state.escalation_count,
        "pipeline run finished"
    );
    println!("{}: {}", task_id, state.phase);
    Ok(())
}

async fn status(config: &Config, task_id: &str) -> Result<()> {
    let task_id = parse_task_id(task_id)?;
    let states = FileStateStore::new(&config.runs_dir);
    let state = states
        .load(&task_id)
        .await
        .with_context(|| format!("cannot load state for task '{task_id}'"))?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
