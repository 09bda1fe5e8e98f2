//! LoomWorks reasoning-backend infrastructure adapter.
//!
//! Implements the [`pipeline::Backend`] trait for the two supported
//! invocation variants:
//!
//! - [`ProcessBackend`] — spawns an external command-line agent and captures
//!   its standard output.
//! - [`HttpBackend`] — POSTs an OpenAI-style chat-completions request to an
//!   inference server and extracts the first choice's message content.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** All process spawning, HTTP transport, request
//! formatting, and response parsing live here. The [`pipeline`] crate sees
//! only [`pipeline::Backend`], and every failure crosses that boundary
//! already classified as a [`pipeline::BackendError`].

use std::sync::Arc;

use pipeline::{Backend, BackendError, BackendName, ModelId};

mod config;
mod http;
mod process;

pub use config::{
    BackendConfig, BackendVariant, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_MAX_TOKENS,
    DEFAULT_PROCESS_TIMEOUT_SECS, DEFAULT_TEMPERATURE,
};
pub use http::HttpBackend;
pub use process::ProcessBackend;

/// Builds a [`Backend`] from its configuration record.
///
/// Invalid configuration (empty name, command, endpoint, or model) fails
/// here, before the pipeline starts; a misconfigured backend is never
/// discovered mid-run.
pub fn backend_from_config(config: &BackendConfig) -> Result<Arc<dyn Backend>, BackendError> {
    let name = BackendName::new(&config.name).ok_or_else(|| BackendError::Config {
        message: "backend name must be non-empty".to_string(),
    })?;

    match &config.variant {
        BackendVariant::Process { command, args } => Ok(Arc::new(ProcessBackend::new(
            name,
            command,
            args.clone(),
            config.timeout(),
        )?)),
        BackendVariant::Http { endpoint, model } => {
            let model = ModelId::new(model).ok_or_else(|| BackendError::Config {
                message: format!("backend '{}' has an empty model identifier", config.name),
            })?;
            Ok(Arc::new(HttpBackend::new(
                name,
                endpoint,
                model,
                config.timeout(),
                config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            )?))
        }
    }
}
