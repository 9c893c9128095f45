//! Error types for the record store
//!
//! None of these escape [`PersistentRecordStore`](crate::PersistentRecordStore):
//! reads fail open to an empty store and writes are dropped after a warning.
//! They exist so storage media can report what went wrong.

use std::path::PathBuf;

/// Storage medium failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error reading or writing the backing file
    #[error("io error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Blob could not be encoded
    #[error("failed to encode store: {0}")]
    Encode(#[from] serde_json::Error),

    /// Medium refused the operation (quota, disabled storage)
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
