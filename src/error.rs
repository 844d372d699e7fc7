//! Centralized error taxonomy for the Cortex decision & memory engine.
//!
//! Every component returns `Result<T>` and never panics; this keeps the
//! engine safe to embed behind a CLI, a daemon, or FFI bindings without
//! risking an unwind across a boundary that can't handle one.

use thiserror::Error;

/// Error kinds shared across every subsystem (spec §7).
#[derive(Error, Debug)]
pub enum Error {
    #[error("input validation failed: {0}")]
    InputValidation(String),

    #[error("offline and no cached answer for this prompt")]
    OfflineAndUncached,

    #[error("no LLM provider available")]
    ProviderUnavailable,

    #[error("provider rate limited: {0}")]
    ProviderRateLimited(String),

    #[error("model output was not valid: {0}")]
    ModelOutputInvalid(String),

    #[error("command rejected by the dangerous-pattern denylist: {0}")]
    CommandRejected(String),

    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    #[error("execution timed out after {0} seconds")]
    ExecutionTimeout(u64),

    #[error("rollback failed: {0}")]
    RollbackFailure(String),

    #[error("rollback refused: unsafe rollback - use force=True to override")]
    RollbackUnsafe,

    #[error("lock busy: {0}")]
    LockBusy(String),

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("illegal state transition: {0}")]
    StateTransitionIllegal(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Crate-wide result alias; see [`Error`] for the full taxonomy.
pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::PersistenceError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::PersistenceError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ModelOutputInvalid(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_readable() {
        let err = Error::NotFound("tx-123".into());
        assert_eq!(err.to_string(), "not found: tx-123");

        let err = Error::ExecutionTimeout(300);
        assert_eq!(err.to_string(), "execution timed out after 300 seconds");
    }

    #[test]
    fn rollback_unsafe_matches_spec_wording() {
        let err = Error::RollbackUnsafe;
        assert!(err.to_string().contains("use force=True to override"));
    }
}
