//! One run, end to end: build, then publish under the slot guard.

use std::sync::Arc;

use pagesmith_core::obs;
use pagesmith_core::{PipelineError, Result, Run, TriggerEvent};
use pagesmith_state::RunLog;
use tracing::{info, warn, Instrument};

use crate::builder::Builder;
use crate::publisher::Publisher;
use crate::slot::{DeploymentSlot, SlotGuard};

/// Executes admitted runs.
///
/// The slot guard is taken before the build starts and released only after
/// the run is terminal and recorded, so at most one run ever writes.
pub struct Pipeline {
    builder: Builder,
    slot: DeploymentSlot,
    run_log: Arc<dyn RunLog>,
}

impl Pipeline {
    pub fn new(builder: Builder, slot: DeploymentSlot, run_log: Arc<dyn RunLog>) -> Self {
        Self {
            builder,
            slot,
            run_log,
        }
    }

    pub fn slot(&self) -> &DeploymentSlot {
        &self.slot
    }

    /// Run `event` to completion. The returned run is always terminal.
    pub async fn execute(&self, event: &TriggerEvent) -> Run {
        let mut run = Run::new(event);
        let span = obs::run_span(&run.run_id().to_string());
        self.drive(&mut run).instrument(span).await;
        run
    }

    async fn drive(&self, run: &mut Run) {
        let run_id = run.run_id().to_string();
        obs::emit_run_started(&run_id, run.trigger().as_str(), run.commit_ref());

        let (guard, outcome) = match self.slot.acquire().await {
            Ok(guard) => {
                let outcome = self.build_and_publish(run, &guard).await;
                (Some(guard), outcome)
            }
            Err(e) => (None, Err(PipelineError::from(e))),
        };
        if let Err(err) = outcome {
            let stage = err.stage();
            obs::emit_run_failed(&run_id, &stage, &err);
            if let Err(e) = run.fail(stage, err.to_string()) {
                warn!(error = %e, "Could not mark run failed");
            }
        }

        obs::emit_run_finished(&run_id, run.status().as_str(), run.duration_ms());
        if let Some(record) = run.to_record() {
            if let Err(e) = self.run_log.append(&record).await {
                warn!(error = %e, "Failed to append run record");
            }
        }
        drop(guard);
    }

    async fn build_and_publish(&self, run: &mut Run, guard: &SlotGuard) -> Result<()> {
        run.start_build()?;
        let output = self.builder.build(run.commit_ref()).await?;
        run.set_resolved_sha(output.resolved_sha.clone())?;

        run.start_publish()?;
        let note = format!("run {} at {}", run.run_id(), output.resolved_sha);
        let publication = Publisher::publish(guard, output.artifacts, Some(note)).await?;

        info!(url = %publication.url, bundle = %publication.bundle_id.short(), "Run published");
        run.succeed(publication.url, publication.bundle_id.to_string())?;
        Ok(())
    }
}
