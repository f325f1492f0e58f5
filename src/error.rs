// ⚠️ Error Taxonomy - Typed failure classification for the pipeline
//
// Three propagation classes:
// - DataIntegrity: fatal, always surfaced with the offending id, never coerced
// - TransientStore: retried with bounded backoff, then the period is marked failed
// - everything else: plumbing failures (I/O, CSV, config) surfaced as-is
//
// Recoverable conditions (empty snapshot, missing lag history, join mismatch)
// are NOT errors - they are counted in RunDiagnostics.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed validity interval, negative weight, or an unrecognized
    /// entity/relation type. Aborts the run; the offending record is named.
    #[error("data integrity violation on {kind} '{id}': {reason}")]
    DataIntegrity {
        kind: &'static str,
        id: String,
        reason: String,
    },

    /// Store query failed in a way worth retrying (lock contention, busy
    /// database, interrupted query). Retried up to the configured budget.
    #[error("transient store failure: {message}")]
    TransientStore { message: String },

    /// Store failed in a way retrying cannot fix (missing file, schema
    /// mismatch, malformed row).
    #[error("store failure: {message}")]
    Store { message: String },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn integrity(kind: &'static str, id: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::DataIntegrity {
            kind,
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        PipelineError::TransientStore {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        PipelineError::Store {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Config {
            message: message.into(),
        }
    }

    /// Whether the retry loop should take another attempt at this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientStore { .. })
    }
}

/// Classify a rusqlite failure: lock/busy conditions are retryable, anything
/// else is a hard store failure.
pub fn classify_sqlite(err: rusqlite::Error) -> PipelineError {
    use rusqlite::ErrorCode;

    match &err {
        rusqlite::Error::SqliteFailure(code, _)
            if matches!(
                code.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::OperationInterrupted
            ) =>
        {
            PipelineError::transient(err.to_string())
        }
        _ => PipelineError::store(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_error_names_offender() {
        let err = PipelineError::integrity("edge", "a->b", "valid_from after valid_to");
        let msg = err.to_string();
        assert!(msg.contains("a->b"));
        assert!(msg.contains("valid_from after valid_to"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_is_retryable() {
        assert!(PipelineError::transient("timeout").is_transient());
        assert!(!PipelineError::store("no such table").is_transient());
        assert!(!PipelineError::config("bad damping").is_transient());
    }

    #[test]
    fn test_sqlite_busy_classified_transient() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert!(classify_sqlite(busy).is_transient());

        let missing = rusqlite::Error::InvalidColumnIndex(7);
        assert!(!classify_sqlite(missing).is_transient());
    }
}
