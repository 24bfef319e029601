//! Shared building blocks for osbridge
//!
//! This crate provides:
//! - Path canonicalization into a filesystem root plus segments
//! - TOML configuration for the watch engine and the daemon
//! - The error type shared by both

pub mod config;
pub mod error;
pub mod paths;

// Re-exports
pub use config::{Config, DaemonConfig, StartupWatch, WatchConfig};
pub use error::CoreError;
pub use paths::{absolutize, split, SplitPath};

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
