//! Error types for the watch engine

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watch engine operations
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Path must be a non-empty string")]
    InvalidPath,

    #[error("Invalid watch options: {reason}")]
    InvalidOptions { reason: String },

    #[error("Recursively watching a filesystem root is not allowed: {path}")]
    RecursiveRoot { path: PathBuf },

    #[error("Already open")]
    AlreadyOpen,

    #[error("Watcher belongs to a different engine")]
    ForeignWatcher,

    #[error("Failed to initialize native watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    Native { path: PathBuf, reason: String },

    #[error("Change handler for {path} failed: {reason}")]
    Handler { path: PathBuf, reason: String },

    #[error(transparent)]
    Path(osb_core::CoreError),
}

impl From<osb_core::CoreError> for WatchError {
    fn from(e: osb_core::CoreError) -> Self {
        match e {
            osb_core::CoreError::EmptyPath => WatchError::InvalidPath,
            other => WatchError::Path(other),
        }
    }
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
