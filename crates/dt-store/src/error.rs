// error.rs — Error types for the record store.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while reading or writing records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// `insert` was called for an id that is already stored.
    #[error("record already exists: {0}")]
    AlreadyExists(Uuid),
}
