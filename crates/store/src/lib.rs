//! LoomWorks persistence infrastructure.
//!
//! Implements the [`pipeline::StateStore`] and [`pipeline::ArtifactStore`]
//! traits over a per-task directory layout:
//!
//! ```text
//! runs/
//!   <task-id>/
//!     state.json              current phase, history, retry bookkeeping
//!     artifacts/
//!       requirement.md
//!       design.md
//!       implementation.md
//! ```
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** All file layout, JSON serialisation, and atomic-write
//! discipline live here. Transition validation uses the phase graph defined
//! by the [`pipeline`] crate; this crate adds no rules of its own.

mod artifacts;
mod state;

pub use artifacts::FileArtifactStore;
pub use state::FileStateStore;
