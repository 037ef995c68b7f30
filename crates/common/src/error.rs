//! Error types shared across ppewatch crates.

use std::path::PathBuf;

/// Top-level error type for ppewatch operations.
#[derive(Debug, thiserror::Error)]
pub enum PpewatchError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Worker error: {message}")]
    Worker { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias using PpewatchError.
pub type PpewatchResult<T> = Result<T, PpewatchError>;

impl PpewatchError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker {
            message: msg.into(),
        }
    }

    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }
}
