//! Domain models for pagesmith.
//!
//! Canonical definitions for the core entities:
//! - `TriggerEvent`: an incoming push or manual dispatch
//! - `Run`: one end-to-end build-then-publish execution
//! - `ArtifactSet`: the static file tree a build produced

pub mod artifact;
pub mod error;
pub mod run;
pub mod trigger;

pub use artifact::ArtifactSet;
pub use error::{BuildError, PipelineError, PublishError, PublishStage, Result};
pub use run::{Run, RunFailure, RunStatus};
pub use trigger::{TriggerEvent, TriggerKind};
