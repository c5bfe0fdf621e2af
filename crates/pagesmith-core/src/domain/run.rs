//! Run tracking.

use chrono::{DateTime, Utc};
use pagesmith_state::{RunOutcome, RunRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{PipelineError, Result};
use super::trigger::{TriggerEvent, TriggerKind};

/// Status of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Building,
    Publishing,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Building => "building",
            RunStatus::Publishing => "publishing",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

/// Where and why a run failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunFailure {
    pub stage: String,
    pub message: String,
}

/// One end-to-end build-then-publish execution.
///
/// State only moves forward: Pending -> Building -> Publishing -> Succeeded,
/// or from any non-terminal state to Failed. Once terminal, every mutator
/// returns `InvalidTransition`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    run_id: Uuid,
    trigger: TriggerKind,
    commit_ref: String,
    branch: String,
    status: RunStatus,
    resolved_sha: Option<String>,
    url: Option<String>,
    bundle_id: Option<String>,
    failure: Option<RunFailure>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a pending run for an admitted event.
    pub fn new(event: &TriggerEvent) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trigger: event.kind,
            commit_ref: event.checkout_ref().to_string(),
            branch: event.branch.clone(),
            status: RunStatus::Pending,
            resolved_sha: None,
            url: None,
            bundle_id: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn trigger(&self) -> TriggerKind {
        self.trigger
    }

    pub fn commit_ref(&self) -> &str {
        &self.commit_ref
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn resolved_sha(&self) -> Option<&str> {
        self.resolved_sha.as_deref()
    }

    /// Public URL; set only once the run succeeded.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn bundle_id(&self) -> Option<&str> {
        self.bundle_id.as_deref()
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Wall-clock duration, up to now for unfinished runs.
    pub fn duration_ms(&self) -> u64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }

    fn transition(&mut self, to: RunStatus) -> Result<()> {
        let allowed = match (self.status, to) {
            (RunStatus::Pending, RunStatus::Building) => true,
            (RunStatus::Building, RunStatus::Publishing) => true,
            (RunStatus::Publishing, RunStatus::Succeeded) => true,
            (from, RunStatus::Failed) => !from.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(PipelineError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn start_build(&mut self) -> Result<()> {
        self.transition(RunStatus::Building)
    }

    /// Record the commit the checkout resolved to.
    pub fn set_resolved_sha(&mut self, sha: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(PipelineError::InvalidTransition {
                from: self.status,
                to: self.status,
            });
        }
        self.resolved_sha = Some(sha.into());
        Ok(())
    }

    pub fn start_publish(&mut self) -> Result<()> {
        self.transition(RunStatus::Publishing)
    }

    pub fn succeed(&mut self, url: impl Into<String>, bundle_id: impl Into<String>) -> Result<()> {
        self.transition(RunStatus::Succeeded)?;
        self.url = Some(url.into());
        self.bundle_id = Some(bundle_id.into());
        Ok(())
    }

    pub fn fail(&mut self, stage: impl Into<String>, message: impl Into<String>) -> Result<()> {
        self.transition(RunStatus::Failed)?;
        self.failure = Some(RunFailure {
            stage: stage.into(),
            message: message.into(),
        });
        Ok(())
    }

    /// Persisted form; `None` while the run is still in flight.
    pub fn to_record(&self) -> Option<RunRecord> {
        let outcome = match self.status {
            RunStatus::Succeeded => RunOutcome::Succeeded,
            RunStatus::Failed => RunOutcome::Failed,
            _ => return None,
        };
        Some(RunRecord {
            run_id: self.run_id.to_string(),
            trigger: self.trigger.to_string(),
            commit_ref: self.commit_ref.clone(),
            branch: self.branch.clone(),
            resolved_sha: self.resolved_sha.clone(),
            outcome,
            url: self.url.clone(),
            bundle_id: self.bundle_id.clone(),
            failed_stage: self.failure.as_ref().map(|f| f.stage.clone()),
            error: self.failure.as_ref().map(|f| f.message.clone()),
            started_at: self.started_at,
            finished_at: self.finished_at.unwrap_or(self.started_at),
        })
    }
}
