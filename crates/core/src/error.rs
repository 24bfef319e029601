//! Error types shared across osbridge crates

use std::path::PathBuf;
use thiserror::Error;

/// Errors from path handling and configuration
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Path must be a non-empty string")]
    EmptyPath,

    #[error("Cannot resolve {path} against the current directory: {source}")]
    CurrentDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config value for {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },
}
