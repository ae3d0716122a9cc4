//! Error types shared across the translation pipeline.
//!
//! Each pipeline step recovers locally where it can (translator falls back
//! to originals, publish failures degrade to warnings); everything that does
//! surface is one of these kinds, and a job carries at most one of them.

use thiserror::Error;

/// Errors recognized by the pipeline core.
#[derive(Debug, Error)]
pub enum ScanlateError {
    /// A required resource was missing (reader container, images, rows).
    #[error("not found: {0}")]
    NotFound(String),

    /// A bot-protection challenge was not solved within the wait budget.
    #[error("blocked: {0}")]
    Blocked(String),

    /// A deadline elapsed (per-chapter budget, upstream request timeout).
    #[error("timeout: {0}")]
    Timeout(String),

    /// An upstream service (LLM, MT, image host) failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// An internal invariant did not hold (recoverable where noted).
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Database or filesystem failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A conflicting row already exists and the policy forbids replacing it.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl ScanlateError {
    /// Whether this error fails the whole job. `Invariant` mismatches are
    /// padded/truncated in place and `Upstream` translator errors fall back
    /// to originals, so neither is fatal on its own.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanlateError::NotFound(_)
                | ScanlateError::Blocked(_)
                | ScanlateError::Timeout(_)
                | ScanlateError::Storage(_)
        )
    }
}

impl From<rusqlite::Error> for ScanlateError {
    fn from(err: rusqlite::Error) -> Self {
        ScanlateError::Storage(err.to_string())
    }
}

impl From<r2d2::Error> for ScanlateError {
    fn from(err: r2d2::Error) -> Self {
        ScanlateError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for ScanlateError {
    fn from(err: std::io::Error) -> Self {
        ScanlateError::Storage(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ScanlateError {
    fn from(err: tokio::task::JoinError) -> Self {
        ScanlateError::Invariant(format!("worker task panicked: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ScanlateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ScanlateError::NotFound("no images".into()).is_fatal());
        assert!(ScanlateError::Blocked("challenge".into()).is_fatal());
        assert!(ScanlateError::Timeout("deadline".into()).is_fatal());
        assert!(!ScanlateError::Upstream("http 500".into()).is_fatal());
        assert!(!ScanlateError::Invariant("length mismatch".into()).is_fatal());
        assert!(!ScanlateError::Conflict("duplicate".into()).is_fatal());
    }
}
