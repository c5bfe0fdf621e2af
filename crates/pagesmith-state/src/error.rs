//! Error types for pagesmith-state

use thiserror::Error;

/// Errors raised by hosting targets and the run log
#[derive(Error, Debug)]
pub enum StateError {
    /// Referenced bundle, blob or record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Hosting target refused the credentials or the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network or connection failure talking to the hosting target
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Hosting target answered with an unexpected status
    #[error("Hosting target rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Uploaded content does not match its declared digest
    #[error("Corrupt content: {0}")]
    Corrupt(String),

    /// Rollback requested with fewer than two live records
    #[error("No previous bundle to roll back to")]
    NoPreviousBundle,

    /// Digest string is not 64 lowercase hex chars
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for StateError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return StateError::from_status(status.as_u16(), err.to_string());
        }
        StateError::Transport(err.to_string())
    }
}

impl StateError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => StateError::Unauthorized(message),
            404 => StateError::NotFound(message),
            _ => StateError::Rejected { status, message },
        }
    }
}
