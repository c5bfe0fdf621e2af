//! Structured observability hooks for the run lifecycle.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`]
//! - Emission functions for key lifecycle events: trigger decisions, run
//!   start/finish, stage results, live slot repoints
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`); failures at
//! `warn!`.

use tracing::{info, warn};

/// Run-scoped span; attach it to the run's future with
/// `tracing::Instrument` so every event carries the run id.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("pagesmith.run", run_id = %run_id)
}

/// Emit event: the trigger gate decided on an incoming event.
pub fn emit_trigger_evaluated(kind: &str, branch: &str, git_ref: &str, decision: &str) {
    info!(
        event = "trigger.evaluated",
        kind = %kind,
        branch = %branch,
        git_ref = %git_ref,
        decision = %decision,
    );
}

/// Emit event: run admitted and started.
pub fn emit_run_started(run_id: &str, trigger: &str, commit_ref: &str) {
    info!(event = "run.started", run_id = %run_id, trigger = %trigger, commit_ref = %commit_ref);
}

/// Emit event: a build stage finished (successfully or not).
pub fn emit_stage_finished(stage: &str, exit_code: Option<i32>, duration_ms: u64, success: bool) {
    info!(
        event = "stage.finished",
        stage = %stage,
        exit_code = ?exit_code,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: the live slot now serves `bundle_id`.
pub fn emit_slot_repointed(bundle_id: &str, url: &str) {
    info!(event = "slot.repointed", bundle_id = %bundle_id, url = %url);
}

/// Emit event: run reached a terminal status.
pub fn emit_run_finished(run_id: &str, status: &str, duration_ms: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = %status,
        duration_ms = duration_ms,
    );
}

/// Emit event: run failed (warning level).
pub fn emit_run_failed(run_id: &str, stage: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run_id = %run_id, stage = %stage, error = %error);
}
