//! Backend configuration records.
//!
//! One [`BackendConfig`] per configured backend, deserialised from the TOML
//! configuration file. Connection parameters are variant-specific; the
//! generation knobs (`temperature`, `max_tokens`) only apply to HTTP-served
//! backends and fall back to server-side defaults when omitted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default invocation timeout for process-executed backends, in seconds.
pub const DEFAULT_PROCESS_TIMEOUT_SECS: u64 = 120;

/// Default invocation timeout for HTTP-served backends, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Default sampling temperature for HTTP-served backends.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Default output-token bound for HTTP-served backends.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Variant-specific connection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum BackendVariant {
    /// Spawns an external command and reads its standard output.
    Process {
        /// Executable path or name resolved via `PATH`.
        command: String,
        /// Extra arguments placed before the prompt (e.g. `["-p", "--print"]`).
        #[serde(default)]
        args: Vec<String>,
    },
    /// POSTs a chat-completions request to an inference server.
    Http {
        /// Full endpoint URL (e.g. `http://localhost:8080/v1/chat/completions`).
        endpoint: String,
        /// Model identifier placed in the request body.
        model: String,
    },
}

/// Configuration record for one named backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique backend name, referenced by role assignments.
    pub name: String,
    /// Connection parameters.
    #[serde(flatten)]
    pub variant: BackendVariant,
    /// Per-invocation wall-clock bound, in seconds. Defaults per variant.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Sampling temperature (HTTP variant only).
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Output-token bound (HTTP variant only).
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl BackendConfig {
    /// The effective timeout, applying the variant default.
    pub fn timeout(&self) -> Duration {
        let default = match self.variant {
            BackendVariant::Process { .. } => DEFAULT_PROCESS_TIMEOUT_SECS,
            BackendVariant::Http { .. } => DEFAULT_HTTP_TIMEOUT_SECS,
        };
        Duration::from_secs(self.timeout_secs.unwrap_or(default))
    }
}
