//! Error types for chama-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from local store, roster, and settings access.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON conversion error (in-memory store values).
    #[error("JSON conversion error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.chama/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// Insert of a key that is already present.
    #[error("{collection}/{key} already exists")]
    AlreadyExists { collection: String, key: String },

    /// Update of a key that is not present.
    #[error("{collection}/{key} not found")]
    NotFound { collection: String, key: String },

    /// A thread panicked while holding the store lock.
    #[error("store lock poisoned")]
    Poisoned,
}
