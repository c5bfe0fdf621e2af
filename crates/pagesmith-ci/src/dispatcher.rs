//! Single-consumer dispatcher feeding admitted events to the pipeline.

use std::sync::Arc;

use pagesmith_core::{Run, TriggerEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::gate::{GateDecision, TriggerGate};
use crate::pipeline::Pipeline;

/// Accepts trigger events and runs them one at a time.
///
/// Admitted events go over a channel to one worker task. After each run the
/// worker asks the gate for the next queued event, so queued events run in
/// arrival order and never overlap. Each run executes in its own task; a run
/// that panics is reported as failed and the worker carries on.
pub struct Dispatcher {
    gate: Arc<TriggerGate>,
    tx: mpsc::UnboundedSender<TriggerEvent>,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    /// Start the worker. Finished runs are sent on the returned receiver;
    /// dropping it is fine.
    pub fn spawn(gate: Arc<TriggerGate>, pipeline: Arc<Pipeline>) -> (Self, mpsc::UnboundedReceiver<Run>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(worker_loop(Arc::clone(&gate), pipeline, rx, done_tx));
        (Self { gate, tx, worker }, done_rx)
    }

    /// Hand `event` to the gate; admitted events start immediately.
    pub fn submit(&self, event: TriggerEvent) -> GateDecision {
        let decision = self.gate.evaluate(event);
        if let GateDecision::Admit(event) = &decision {
            if self.tx.send(event.clone()).is_err() {
                warn!("Dispatcher worker is gone; releasing gate");
                self.gate.complete();
            }
        }
        decision
    }

    /// Number of events waiting behind the active run.
    pub fn pending(&self) -> usize {
        self.gate.pending()
    }

    /// Stop accepting events and wait until every admitted and queued event
    /// has run.
    pub async fn drain(self) -> anyhow::Result<()> {
        drop(self.tx);
        self.worker.await?;
        Ok(())
    }
}

async fn worker_loop(
    gate: Arc<TriggerGate>,
    pipeline: Arc<Pipeline>,
    mut rx: mpsc::UnboundedReceiver<TriggerEvent>,
    done: mpsc::UnboundedSender<Run>,
) {
    while let Some(event) = rx.recv().await {
        let mut next = Some(event);
        while let Some(event) = next {
            let run = execute_isolated(&pipeline, event).await;
            let _ = done.send(run);
            next = gate.complete();
        }
    }
    info!("Dispatcher stopped");
}

async fn execute_isolated(pipeline: &Arc<Pipeline>, event: TriggerEvent) -> Run {
    let task = {
        let pipeline = Arc::clone(pipeline);
        let event = event.clone();
        tokio::spawn(async move { pipeline.execute(&event).await })
    };
    match task.await {
        Ok(run) => run,
        Err(e) => {
            error!(error = %e, git_ref = %event.git_ref, "Run task aborted");
            let mut run = Run::new(&event);
            if let Err(err) = run.fail("pipeline", format!("run aborted: {e}")) {
                warn!(error = %err, "Could not mark run failed");
            }
            run
        }
    }
}
