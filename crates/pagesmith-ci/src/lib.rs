//! pagesmith CI - build and publish orchestration
//!
//! Provides the run pipeline that:
//! - Admits trigger events through the gate, queueing them FIFO
//! - Builds a checkout into an artifact set via external commands
//! - Publishes the artifact set as a bundle and repoints the live slot

pub mod builder;
pub mod dispatcher;
pub mod gate;
pub mod pipeline;
pub mod publisher;
pub mod runner;
pub mod slot;
pub mod stage;

// Re-export key types
pub use builder::{BuildOutput, Builder};
pub use dispatcher::Dispatcher;
pub use gate::{GateDecision, TriggerGate};
pub use pipeline::Pipeline;
pub use publisher::{Publication, Publisher};
pub use runner::{StageResult, StageRunner};
pub use slot::{DeploymentSlot, SlotGuard};
pub use stage::{BuiltinStage, StageConfig};
