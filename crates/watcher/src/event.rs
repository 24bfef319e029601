//! Events delivered to watcher handles

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::WatchError;

/// What happened to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Entry appeared
    Add,
    /// Entry still exists and was touched
    Change,
    /// Entry is gone
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Change => "change",
            Action::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to one filesystem entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub action: Action,
    /// Name of the entry inside its directory
    pub filename: String,
    /// Full path of the entry, as seen from the watched path
    pub file: PathBuf,
}

impl ChangeEvent {
    pub(crate) fn new(action: Action, file: PathBuf) -> Self {
        let filename = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            action,
            filename,
            file,
        }
    }

    /// Re-express the event under a different directory
    ///
    /// Used when an event on a symlink target is relayed to the link.
    pub(crate) fn rebase(&self, from: &Path, to: &Path) -> Self {
        let file = match self.file.strip_prefix(from) {
            Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
            Ok(rest) => to.join(rest),
            Err(_) => self.file.clone(),
        };
        Self::new(self.action, file)
    }
}

/// Everything a watcher handle can emit
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    Change(ChangeEvent),
    Error {
        error: Arc<WatchError>,
        event: Option<ChangeEvent>,
    },
}
