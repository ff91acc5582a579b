use chrono::NaiveDate;
use rusqlite::ErrorCode;
use thiserror::Error;

use crate::model::UnitRef;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("no child reports for {aggregator} on {date}")]
    NoChildReports { aggregator: UnitRef, date: NaiveDate },
    #[error("concurrent write on {0}; resubmit")]
    Conflict(String),
    #[error("store failure: {0}")]
    Store(#[from] rusqlite::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        EngineError::Forbidden(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::NotFound(_) => "not_found",
            EngineError::NoChildReports { .. } => "no_child_reports",
            EngineError::Conflict(_) => "conflict",
            EngineError::Store(_) => "store_failed",
        }
    }

    /// HTTP status the error corresponds to on the request surface.
    pub fn status(&self) -> u16 {
        match self {
            EngineError::Validation(_) | EngineError::NoChildReports { .. } => 400,
            EngineError::Forbidden(_) => 403,
            EngineError::NotFound(_) => 404,
            EngineError::Conflict(_) => 409,
            EngineError::Store(_) => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    /// Reclassify a failure raised inside a write transaction for `key`.
    pub fn on_write(self, key: &str) -> Self {
        match self {
            EngineError::Store(e) => write_failure(key, e),
            other => other,
        }
    }
}

/// Busy/locked failures are transient; everything else is not.
pub fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

/// Writes are never retried: lock contention and unique-key races become `Conflict`.
fn write_failure(key: &str, e: rusqlite::Error) -> EngineError {
    if is_transient(&e) || is_unique_violation(&e) {
        EngineError::Conflict(key.to_string())
    } else {
        EngineError::Store(e)
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
