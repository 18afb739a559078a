use std::path::PathBuf;

use thiserror::Error;

use crate::models::BatchStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("import batch {0} not found")]
    BatchNotFound(String),

    /// A write would break a stored invariant, e.g. a second score for the
    /// same asset in the same batch.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: BatchStatus, to: BatchStatus },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to create database directory {}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The store call never finished, e.g. its worker thread panicked.
    #[error("store operation interrupted: {0}")]
    Interrupted(String),

    #[error("failed to encode asset id list: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Constraint failures (UNIQUE, CHECK) become invariant violations.
    pub(crate) fn from_write(err: rusqlite::Error, what: impl FnOnce() -> String) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                StoreError::InvariantViolation(what())
            }
            other => StoreError::Sqlite(other),
        }
    }
}
