//! Trigger gate: admission and FIFO queueing of trigger events.

use std::collections::VecDeque;
use std::sync::Mutex;

use pagesmith_core::{PipelineError, TriggerConfig, TriggerEvent, TriggerKind};

/// Gate decision for one event.
#[derive(Debug)]
pub enum GateDecision {
    /// Start a run for this (normalized) event now.
    Admit(TriggerEvent),

    /// A run is active; the event waits at `position` (1 = next).
    Queued { position: usize },

    /// The event is not a trigger this site builds on.
    Reject(PipelineError),
}

impl GateDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateDecision::Admit(_) => "admit",
            GateDecision::Queued { .. } => "queue",
            GateDecision::Reject(_) => "reject",
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    active: bool,
    queue: VecDeque<TriggerEvent>,
}

/// Admits push-to-branch and manual events, one run at a time.
///
/// Events arriving while a run is active are queued, never dropped, and
/// handed out in arrival order by [`TriggerGate::complete`].
#[derive(Debug)]
pub struct TriggerGate {
    branch: String,
    allow_manual: bool,
    state: Mutex<GateState>,
}

impl TriggerGate {
    pub fn new(config: &TriggerConfig) -> Self {
        Self {
            branch: config.branch.clone(),
            allow_manual: config.allow_manual,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Apply the admission rules only: normalize `event` or reject it,
    /// without claiming the gate. For one-shot runs that rely on the
    /// deployment slot for exclusion.
    pub fn check(&self, event: TriggerEvent) -> Result<TriggerEvent, PipelineError> {
        self.normalize(event).map_err(|rejected| {
            pagesmith_core::obs::emit_trigger_evaluated(
                rejected.kind.as_str(),
                &rejected.branch,
                &rejected.git_ref,
                "reject",
            );
            PipelineError::TriggerRejected {
                kind: rejected.kind.to_string(),
                branch: rejected.branch,
            }
        })
    }

    /// Decide on `event`.
    ///
    /// Admission marks the gate active; the caller must call
    /// [`complete`](Self::complete) when the run terminates.
    pub fn evaluate(&self, event: TriggerEvent) -> GateDecision {
        let event = match self.check(event) {
            Ok(event) => event,
            Err(err) => return GateDecision::Reject(err),
        };

        let mut state = self.lock();
        let decision = if state.active {
            state.queue.push_back(event.clone());
            GateDecision::Queued {
                position: state.queue.len(),
            }
        } else {
            state.active = true;
            GateDecision::Admit(event.clone())
        };
        drop(state);

        pagesmith_core::obs::emit_trigger_evaluated(
            event.kind.as_str(),
            &event.branch,
            event.checkout_ref(),
            decision.as_str(),
        );
        decision
    }

    /// Mark the active run finished.
    ///
    /// Returns the next queued event, which is now the active one, or
    /// `None` when the queue is empty and the gate is idle.
    pub fn complete(&self) -> Option<TriggerEvent> {
        let mut state = self.lock();
        let next = state.queue.pop_front();
        state.active = next.is_some();
        next
    }

    /// Number of queued events.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    fn normalize(&self, mut event: TriggerEvent) -> Result<TriggerEvent, TriggerEvent> {
        match event.kind {
            TriggerKind::Push if event.branch == self.branch => Ok(event),
            TriggerKind::Manual if self.allow_manual => {
                if event.branch.trim().is_empty() {
                    event.branch = self.branch.clone();
                }
                Ok(event)
            }
            _ => Err(event),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        // The state is a flag and a queue; it stays consistent even if a
        // holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
