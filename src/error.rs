//! Error types for the DiceSmith engine.

use thiserror::Error;

/// All errors that can occur in the DiceSmith engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A catalog, settings, or count-vector input was malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An efficiency plan failed validation; the workflow refuses to start.
    #[error("invalid efficiency plan: {}", .errors.join("; "))]
    InvalidPlan {
        /// One message per row/cross-row violation found by the validator.
        errors: Vec<String>,
    },

    /// A loadout was degenerate: zero dice, or a zero-sum face distribution.
    #[error("invalid loadout: {0}")]
    InvalidLoadout(String),

    /// Cooperative cancellation was observed.
    #[error("operation canceled")]
    Canceled,

    /// The cache store is unavailable (I/O or database error on open/read/write).
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// A transient, retryable failure occurred (writer-side contention).
    #[error("transient error: {0}")]
    Transient(String),
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                EngineError::Transient(err.to_string())
            }
            _ => EngineError::CacheUnavailable(err.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::CacheUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidInput(err.to_string())
    }
}
