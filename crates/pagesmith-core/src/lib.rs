//! pagesmith core library
//!
//! Domain model (runs, triggers, artifacts, errors), configuration, git
//! helpers and observability shared by the pipeline and the binaries.

pub mod config;
pub mod domain;
pub mod git;
pub mod obs;
pub mod telemetry;

pub use config::{
    BuildConfig, Config, PublishBackend, PublishConfig, SourceConfig, StateConfig, ToolSpec,
    TriggerConfig, CONFIG_FILE, DEFAULT_CONFIG_TOML,
};
pub use domain::{
    ArtifactSet, BuildError, PipelineError, PublishError, PublishStage, Result, Run, RunFailure,
    RunStatus, TriggerEvent, TriggerKind,
};
pub use git::resolve_commit;
pub use obs::run_span;
pub use telemetry::init_tracing;

/// pagesmith version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
