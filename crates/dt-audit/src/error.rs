// error.rs — Error types for the execution log, audit trail and exports.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to open or create the audit log file.
    #[error("failed to open audit log at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The audit log has been tampered with; the hash chain is broken.
    #[error("integrity check failed at line {line}: expected hash {expected}, got {actual}")]
    IntegrityViolation {
        line: usize,
        expected: String,
        actual: String,
    },

    #[error("executed action not found: {0}")]
    ActionNotFound(Uuid),

    #[error("failed to render export: {0}")]
    Render(#[from] csv::Error),

    #[error("store error: {0}")]
    Store(#[from] dt_store::StoreError),
}
