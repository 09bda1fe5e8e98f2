//! Core orchestration domain for LoomWorks.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, cross-cutting error type, the phase state machine, the template
//! renderer, and the pipeline driver. Infrastructure crates implement the
//! port traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply
//! it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype domain identifiers (`TaskId`, `BackendName`, etc.) |
//! | [`types`] | Shared value types (`Phase`, `TaskState`, `ErrorClass`, etc.) |
//! | [`errors`] | Error taxonomy and retry-policy types |
//! | [`template`] | Placeholder substitution for prompt templates |
//! | [`ports`] | Port traits (`Backend`, `StateStore`, `ArtifactStore`, ...) |
//! | [`driver`] | The pipeline driver: sequencing, retry, escalation |

pub mod driver;
pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod template;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use driver::{
    PipelineDriver, RoleBackends, RunOptions, Templates, DESIGN_PLACEHOLDER,
    REQUIREMENT_PLACEHOLDER,
};
pub use errors::{
    ArtifactError, BackendError, PipelineError, RetryPolicy, StateError, TemplateError,
};
pub use identifiers::{BackendName, ModelId, PipelineRunId, TaskId};
pub use ports::{
    ArtifactStore, Backend, InvocationOutput, InvocationRequest, Reviewer, StateStore, TestRunner,
};
pub use template::{fold_context, render, render_strict, Bindings, ContextFile};
pub use types::{
    ArtifactKind, ErrorClass, ErrorSeverity, Phase, PhaseTransition, RetryLimits, ReviewReport,
    ReviewVerdict, TaskState, TestReport, TestVerdict, Timestamp,
};
