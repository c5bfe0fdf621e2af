//! Trigger events.

use serde::{Deserialize, Serialize};

/// What fired the trigger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// A push to a branch.
    Push,

    /// An operator-requested run.
    Manual,

    /// Any other event source (tags, pull requests, ...). Always rejected.
    #[serde(other)]
    Unsupported,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Push => "push",
            TriggerKind::Manual => "manual",
            TriggerKind::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event from the version-control host.
///
/// Wire form: `{"kind": "push", "ref": "<sha or ref>", "branch": "main"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerEvent {
    pub kind: TriggerKind,

    /// Commit reference to build. Empty means "tip of `branch`".
    #[serde(rename = "ref", default)]
    pub git_ref: String,

    /// Branch the event refers to.
    #[serde(default)]
    pub branch: String,
}

impl TriggerEvent {
    pub fn push(branch: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Push,
            git_ref: git_ref.into(),
            branch: branch.into(),
        }
    }

    pub fn manual(branch: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Manual,
            git_ref: git_ref.into(),
            branch: branch.into(),
        }
    }

    /// The ref to check out: `git_ref`, falling back to the branch name.
    pub fn checkout_ref(&self) -> &str {
        if self.git_ref.trim().is_empty() {
            &self.branch
        } else {
            &self.git_ref
        }
    }
}
