//! Error types for chama-sync.

use std::path::PathBuf;

use thiserror::Error;

use chama_core::StoreError;
use chama_ledger::LedgerError;

/// All errors that can arise from push, pull, and remote operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote store could not be reached. Retried on the next cycle.
    #[error("remote unavailable: {0}")]
    TransientIo(String),

    /// A remote call exceeded `remote_timeout_ms`.
    #[error("remote call timed out after {0} ms")]
    Timeout(u64),

    /// An error from the local store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A ledger follow-up to a pulled change failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A remote document could not be decoded into the expected entity.
    #[error("malformed document {collection}/{key}: {reason}")]
    MalformedDocument {
        collection: String,
        key: String,
        reason: String,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("document JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem watcher setup failed.
    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),
}

impl SyncError {
    /// Failures the next scheduled cycle may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientIo(_) | SyncError::Timeout(_))
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
