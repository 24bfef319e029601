//! Shared watch engine
//!
//! An [`Engine`] owns the watch tree and the native backend. All tree work
//! happens under one lock; listener callbacks run after it is released, so
//! a listener may open or close watchers without deadlocking.
//!
//! With the notify backend a dedicated thread drains native events. The
//! notify callback only forwards raw events into a channel, which keeps
//! `Watcher::new` safe to call from inside a change listener.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use notify::{Event, EventKind};
use osb_core::WatchConfig;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::backend::{NativeBackend, NotifyBackend};
use crate::event::ChangeEvent;
use crate::handle::Watcher;
use crate::node::NodeId;
use crate::stats::Status;
use crate::tree::{Delivery, NodeInfo, Tree};
use crate::WatchError;

struct EngineInner {
    tree: Mutex<Tree>,
    config: WatchConfig,
}

/// Handle to a watch engine; clones share the same tree
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Engine backed by the platform's native watcher
    pub fn new(config: WatchConfig) -> Result<Self, WatchError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let backend = NotifyBackend::new(tx)?;
        let engine = Self::with_backend(config, Box::new(backend));
        engine.spawn_dispatcher(rx)?;
        Ok(engine)
    }

    /// Engine over a custom backend
    ///
    /// No dispatcher thread is started; events are fed through
    /// [`process_event`](Self::process_event).
    pub fn with_backend(config: WatchConfig, backend: Box<dyn NativeBackend>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                tree: Mutex::new(Tree::new(config.clone(), backend)),
                config,
            }),
        }
    }

    fn spawn_dispatcher(&self, rx: Receiver<notify::Result<Event>>) -> Result<(), WatchError> {
        let weak = Arc::downgrade(&self.inner);
        let debounce = self.inner.config.stats_debounce();
        std::thread::Builder::new()
            .name("osb-watch-dispatch".to_string())
            .spawn(move || dispatch_loop(weak, rx, debounce))
            .map_err(|e| WatchError::InitFailed {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    pub fn config(&self) -> &WatchConfig {
        &self.inner.config
    }

    /// Make sure the node chain for `path` exists, attaching `watcher` if given
    pub fn register(
        &self,
        path: impl AsRef<Path>,
        watcher: Option<&Watcher>,
    ) -> Result<NodeId, WatchError> {
        if let Some(watcher) = watcher {
            self.check_owner(watcher)?;
        }
        let (id, deliveries) = {
            let mut tree = self.inner.tree.lock();
            let id = tree.register(path.as_ref(), watcher.map(|w| w.subscription()))?;
            (id, tree.take_deliveries())
        };
        dispatch(deliveries);
        Ok(id)
    }

    /// Detach `watcher` and release unused nodes
    ///
    /// Returns true when the path's root node was destroyed.
    pub fn unregister(
        &self,
        path: impl AsRef<Path>,
        watcher: Option<&Watcher>,
    ) -> Result<bool, WatchError> {
        if let Some(watcher) = watcher {
            self.check_owner(watcher)?;
        }
        let (destroyed, deliveries) = {
            let mut tree = self.inner.tree.lock();
            let destroyed = tree.unregister(path.as_ref(), watcher.map(|w| w.id()))?;
            (destroyed, tree.take_deliveries())
        };
        dispatch(deliveries);
        Ok(destroyed)
    }

    fn check_owner(&self, watcher: &Watcher) -> Result<(), WatchError> {
        if Arc::ptr_eq(&watcher.engine().inner, &self.inner) {
            Ok(())
        } else {
            Err(WatchError::ForeignWatcher)
        }
    }

    /// Feed one native event into the tree
    pub fn process_event(&self, event: Event) {
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }
        if event.need_rescan() {
            warn!("Native event queue overflowed; some changes may have been missed");
        }

        let deliveries = {
            let mut tree = self.inner.tree.lock();
            for path in &event.paths {
                tree.route(path);
            }
            tree.take_deliveries()
        };
        dispatch(deliveries);
    }

    /// Receive every change that reaches a root node
    pub fn subscribe_all(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner.tree.lock().subscribe_all(tx);
        rx
    }

    pub fn status(&self) -> Status {
        self.inner.tree.lock().status()
    }

    pub fn node_info(&self, id: NodeId) -> Option<NodeInfo> {
        self.inner.tree.lock().node_info(id)
    }

    /// Node for `path`, if one is in the tree
    pub fn lookup(&self, path: impl AsRef<Path>) -> Result<Option<NodeId>, WatchError> {
        self.inner.tree.lock().lookup(path.as_ref())
    }

    /// Tear down every node and forget every handle
    ///
    /// Handles still open stop receiving events; closing them afterwards
    /// does nothing.
    pub fn reset(&self) {
        self.inner.tree.lock().reset();
    }

    fn log_tree_if_due(&self) {
        let mut tree = self.inner.tree.lock();
        if tree.stats.take_due(Instant::now()) {
            let status = tree.status();
            debug!(
                nodes = status.nodes,
                fswatchers = status.fswatchers,
                watchers = status.watchers,
                "Watch tree\n{}",
                status.tree
            );
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Hand queued changes to their handles, in queue order
fn dispatch(deliveries: Vec<Delivery>) {
    for delivery in deliveries {
        delivery.sink.emit_change(&delivery.event);
    }
}

fn dispatch_loop(
    weak: Weak<EngineInner>,
    rx: Receiver<notify::Result<Event>>,
    debounce: Duration,
) {
    debug!("Watch dispatcher started");
    loop {
        let received = rx.recv_timeout(debounce);
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let engine = Engine { inner };
        match received {
            Ok(Ok(event)) => engine.process_event(event),
            Ok(Err(e)) => warn!("Native watcher error: {}", e),
            Err(RecvTimeoutError::Timeout) => engine.log_tree_if_due(),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Watch dispatcher stopped");
}
