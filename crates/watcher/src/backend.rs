//! Native watch backends
//!
//! The tree opens one non-recursive native watch per existing directory
//! node. [`NotifyBackend`] maps those onto a single `notify` watcher whose
//! raw events are forwarded to a channel; [`NullBackend`] opens nothing and
//! is used to drive the engine by hand.

use crossbeam_channel::Sender;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::path::Path;

use crate::WatchError;

/// Per-directory native watch primitive
pub trait NativeBackend: Send {
    /// Start receiving events for the direct entries of `path`
    fn watch(&mut self, path: &Path) -> Result<(), WatchError>;

    /// Stop watching `path`
    fn unwatch(&mut self, path: &Path) -> Result<(), WatchError>;

    /// Short description for diagnostics
    fn name(&self) -> &'static str;
}

/// Backend on top of the platform's recommended `notify` watcher
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
}

impl NotifyBackend {
    /// Create the OS watcher; events are pushed into `tx` as they arrive
    pub fn new(tx: Sender<notify::Result<Event>>) -> Result<Self, WatchError> {
        let watcher = notify::recommended_watcher(move |res| {
            // Receiver gone means the engine is shutting down
            let _ = tx.send(res);
        })?;
        Ok(Self { watcher })
    }
}

impl NativeBackend for NotifyBackend {
    fn watch(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Native {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    fn unwatch(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watcher.unwatch(path).map_err(|e| WatchError::Native {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "notify"
    }
}

/// Backend that opens no OS watches
///
/// Events are fed with [`Engine::process_event`](crate::Engine::process_event).
#[derive(Debug, Default)]
pub struct NullBackend;

impl NativeBackend for NullBackend {
    fn watch(&mut self, _path: &Path) -> Result<(), WatchError> {
        Ok(())
    }

    fn unwatch(&mut self, _path: &Path) -> Result<(), WatchError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
