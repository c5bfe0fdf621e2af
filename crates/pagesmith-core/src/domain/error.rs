//! Domain-level error taxonomy for pagesmith.

use pagesmith_state::StateError;

use super::run::RunStatus;

/// A build stage failed. Never accompanied by artifacts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("build failed at stage '{stage}' (exit status {}): {message}", exit_label(.exit_status))]
pub struct BuildError {
    /// Stage name (`checkout`, `toolchain`, `target`, `tool:<name>`, `build`, `collect`).
    pub stage: String,

    /// Process exit code, `None` if the process never ran to completion.
    pub exit_status: Option<i32>,

    pub message: String,
}

impl BuildError {
    pub fn new(stage: impl Into<String>, exit_status: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            exit_status,
            message: message.into(),
        }
    }
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

/// Publisher step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    Upload,
    SetLive,
    Rollback,
}

impl PublishStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStage::Upload => "upload",
            PublishStage::SetLive => "set_live",
            PublishStage::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for PublishStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publishing failed. The live slot still serves what it served before.
#[derive(Debug, thiserror::Error)]
#[error("publish failed at stage '{stage}': {cause}")]
pub struct PublishError {
    pub stage: PublishStage,
    #[source]
    pub cause: StateError,
}

impl PublishError {
    pub fn new(stage: PublishStage, cause: StateError) -> Self {
        Self { stage, cause }
    }
}

/// pagesmith domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("trigger rejected: {kind} event on branch '{branch}'")]
    TriggerRejected { kind: String, branch: String },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("invalid run transition: {from:?} -> {to:?}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("config error: {0}")]
    Config(String),

    #[error("git error: {0}")]
    Git(String),

    /// Hosting target or run log could not be opened or locked.
    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl PipelineError {
    /// Name of the stage to report for a failed run.
    pub fn stage(&self) -> String {
        match self {
            PipelineError::TriggerRejected { .. } => "trigger".to_string(),
            PipelineError::Build(e) => e.stage.clone(),
            PipelineError::Publish(e) => e.stage.to_string(),
            PipelineError::Config(_) => "config".to_string(),
            PipelineError::State(_) => "slot".to_string(),
            PipelineError::InvalidTransition { .. } | PipelineError::Git(_) => {
                "pipeline".to_string()
            }
        }
    }
}

/// Result type for pagesmith domain operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
