//! Caller-facing watcher handles
//!
//! A [`Watcher`] is one subscription to one path. Any number of handles may
//! watch the same path; the engine shares the underlying tree nodes and
//! native watches between them.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::Engine;
use crate::event::{ChangeEvent, WatcherEvent};
use crate::WatchError;

/// Unique id of a watcher handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Options accepted by [`Watcher::new`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub recursive: bool,
    /// Directory levels delivered, the watched directory being the first;
    /// `None` means unlimited
    pub depth: Option<u32>,
}

impl WatchOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            depth: None,
        }
    }

    pub fn depth(depth: u32) -> Self {
        Self {
            recursive: true,
            depth: Some(depth),
        }
    }

    /// Validate and convert to a [`Recursion`]
    pub fn recursion(&self) -> Result<Recursion, WatchError> {
        match (self.recursive, self.depth) {
            (false, None) => Ok(Recursion::Off),
            (false, Some(_)) => Err(WatchError::InvalidOptions {
                reason: "depth requires recursive".to_string(),
            }),
            (true, None) => Ok(Recursion::Unlimited),
            (true, Some(0)) => Ok(Recursion::Off),
            (true, Some(depth)) => Ok(Recursion::Depth(depth)),
        }
    }
}

/// How far below its path a handle sees changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recursion {
    Off,
    Depth(u32),
    Unlimited,
}

impl Recursion {
    pub fn is_recursive(&self) -> bool {
        !matches!(self, Recursion::Off)
    }

    /// Levels of subdirectories still delivered below a node `distance`
    /// levels under the watched one
    pub(crate) fn remaining(&self, distance: u32) -> u32 {
        match self {
            Recursion::Off => 0,
            Recursion::Depth(depth) => depth.saturating_sub(distance.saturating_add(1)),
            Recursion::Unlimited => u32::MAX,
        }
    }

    /// Whether a change raised `depth` directories below is delivered
    pub(crate) fn covers(&self, depth: u32) -> bool {
        match self {
            Recursion::Off => depth == 0,
            Recursion::Depth(max) => depth < *max,
            Recursion::Unlimited => true,
        }
    }
}

type ChangeListener = Arc<dyn Fn(&ChangeEvent) -> anyhow::Result<()> + Send + Sync>;
type ErrorListener = Arc<dyn Fn(&WatchError, Option<&ChangeEvent>) + Send + Sync>;

/// Delivery end of a handle, shared with the engine
pub(crate) struct Sink {
    path: PathBuf,
    change_listeners: Mutex<Vec<ChangeListener>>,
    error_listeners: Mutex<Vec<ErrorListener>>,
    channels: Mutex<Vec<Sender<WatcherEvent>>>,
}

impl Sink {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            change_listeners: Mutex::new(Vec::new()),
            error_listeners: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
        }
    }

    /// Deliver a change; listener failures become error events on this sink only
    pub fn emit_change(&self, event: &ChangeEvent) {
        let listeners = self.change_listeners.lock().clone();
        let mut failures = Vec::new();

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(e.to_string()),
                Err(panic) => failures.push(panic_message(panic.as_ref())),
            }
        }

        self.send(WatcherEvent::Change(event.clone()));

        for reason in failures {
            let error = WatchError::Handler {
                path: self.path.clone(),
                reason,
            };
            self.emit_error(error, Some(event));
        }
    }

    pub fn emit_error(&self, error: WatchError, event: Option<&ChangeEvent>) {
        let listeners = self.error_listeners.lock().clone();
        let has_channels = !self.channels.lock().is_empty();

        if listeners.is_empty() && !has_channels {
            tracing::warn!("Unhandled watcher error on {}: {}", self.path.display(), error);
            return;
        }

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&error, event))).is_err() {
                tracing::warn!("Error listener panicked for {}", self.path.display());
            }
        }

        self.send(WatcherEvent::Error {
            error: Arc::new(error),
            event: event.cloned(),
        });
    }

    pub fn subscribe(&self) -> Receiver<WatcherEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.channels.lock().push(tx);
        rx
    }

    fn send(&self, event: WatcherEvent) {
        let mut channels = self.channels.lock();
        channels.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}

/// What the engine stores for an attached handle
#[derive(Clone)]
pub(crate) struct Subscription {
    pub id: WatcherId,
    pub recursion: Recursion,
    pub sink: Arc<Sink>,
}

/// A subscription to changes under one path
///
/// Closing (or dropping) the handle detaches it from the watch tree;
/// nodes no other handle needs are torn down with it.
pub struct Watcher {
    id: WatcherId,
    engine: Engine,
    path: PathBuf,
    recursion: Recursion,
    opened: AtomicBool,
    sink: Arc<Sink>,
}

impl Watcher {
    /// Validate options and start watching `path`
    ///
    /// Fails with `InvalidPath` for an empty path, `InvalidOptions` for
    /// inconsistent options and `RecursiveRoot` for a recursive watch on a
    /// filesystem root.
    pub fn new(
        engine: &Engine,
        path: impl AsRef<Path>,
        options: WatchOptions,
    ) -> Result<Self, WatchError> {
        let watcher = Self::prepare(engine, path, options)?;
        watcher.open()?;
        Ok(watcher)
    }

    /// Validate like [`Watcher::new`] but leave the handle closed
    ///
    /// Listeners attached before [`Watcher::open`] see every change from
    /// the moment the handle joins the tree.
    pub fn prepare(
        engine: &Engine,
        path: impl AsRef<Path>,
        options: WatchOptions,
    ) -> Result<Self, WatchError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(WatchError::InvalidPath);
        }
        let recursion = options.recursion()?;

        let split = osb_core::split(path)?;
        if recursion.is_recursive() && split.is_root() {
            return Err(WatchError::RecursiveRoot {
                path: split.to_path_buf(),
            });
        }

        let path = split.to_path_buf();
        Ok(Self {
            id: WatcherId::next(),
            engine: engine.clone(),
            sink: Arc::new(Sink::new(path.clone())),
            path,
            recursion,
            opened: AtomicBool::new(false),
        })
    }

    /// Attach a prepared or closed handle to the tree
    pub fn open(&self) -> Result<(), WatchError> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(WatchError::AlreadyOpen);
        }
        if let Err(e) = self.engine.register(&self.path, Some(self)) {
            self.opened.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Detach from the tree
    ///
    /// Returns true when the path's node chain was torn down. Closing a
    /// closed handle does nothing and returns false.
    pub fn close(&self) -> bool {
        if !self.opened.swap(false, Ordering::SeqCst) {
            return false;
        }
        match self.engine.unregister(&self.path, Some(self)) {
            Ok(destroyed) => destroyed,
            Err(e) => {
                tracing::warn!("Failed to unregister {}: {}", self.path.display(), e);
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn id(&self) -> WatcherId {
        self.id
    }

    /// Absolute, normalized watched path
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn recursion(&self) -> Recursion {
        self.recursion
    }

    /// Call `listener` for every change
    ///
    /// An `Err` or a panic from the listener is reported as an error event
    /// on this handle; other handles are unaffected.
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&ChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.sink.change_listeners.lock().push(Arc::new(listener));
    }

    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&WatchError, Option<&ChangeEvent>) + Send + Sync + 'static,
    {
        self.sink.error_listeners.lock().push(Arc::new(listener));
    }

    /// Receive changes and errors on a channel
    pub fn events(&self) -> Receiver<WatcherEvent> {
        self.sink.subscribe()
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn subscription(&self) -> Subscription {
        Subscription {
            id: self.id,
            recursion: self.recursion,
            sink: self.sink.clone(),
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("recursion", &self.recursion)
            .field("opened", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Action;

    #[test]
    fn test_options_to_recursion() {
        assert_eq!(WatchOptions::default().recursion().unwrap(), Recursion::Off);
        assert_eq!(WatchOptions::recursive().recursion().unwrap(), Recursion::Unlimited);
        assert_eq!(WatchOptions::depth(3).recursion().unwrap(), Recursion::Depth(3));
        assert_eq!(WatchOptions::depth(0).recursion().unwrap(), Recursion::Off);

        let bad = WatchOptions {
            recursive: false,
            depth: Some(2),
        };
        assert!(matches!(bad.recursion(), Err(WatchError::InvalidOptions { .. })));
    }

    #[test]
    fn test_recursion_coverage() {
        assert!(Recursion::Off.covers(0));
        assert!(!Recursion::Off.covers(1));
        assert!(Recursion::Depth(2).covers(0));
        assert!(Recursion::Depth(2).covers(1));
        assert!(!Recursion::Depth(2).covers(2));
        assert!(Recursion::Unlimited.covers(100));

        // One level only sees the watched directory's own entries
        assert!(Recursion::Depth(1).covers(0));
        assert!(!Recursion::Depth(1).covers(1));
        assert_eq!(Recursion::Depth(1).remaining(0), 0);

        assert_eq!(Recursion::Depth(2).remaining(0), 1);
        assert_eq!(Recursion::Depth(2).remaining(1), 0);
        assert_eq!(Recursion::Depth(3).remaining(1), 1);
        assert_eq!(Recursion::Depth(2).remaining(5), 0);
        assert_eq!(Recursion::Off.remaining(0), 0);
    }

    #[test]
    fn test_failing_listener_becomes_error_event() {
        let sink = Sink::new(PathBuf::from("/d"));
        let (tx, rx) = crossbeam_channel::unbounded();
        sink.channels.lock().push(tx);
        sink.change_listeners
            .lock()
            .push(Arc::new(|_: &ChangeEvent| -> anyhow::Result<()> {
                anyhow::bail!("consumer broke")
            }));
        sink.change_listeners
            .lock()
            .push(Arc::new(|_: &ChangeEvent| -> anyhow::Result<()> { panic!("boom") }));

        let event = ChangeEvent::new(Action::Add, PathBuf::from("/d/x"));
        sink.emit_change(&event);

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), 3);
        assert!(matches!(&received[0], WatcherEvent::Change(e) if e == &event));
        match &received[1] {
            WatcherEvent::Error { error, event: Some(e) } => {
                assert!(error.to_string().contains("consumer broke"));
                assert_eq!(e, &event);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            &received[2],
            WatcherEvent::Error { error, .. } if error.to_string().contains("boom")
        ));
    }
}
