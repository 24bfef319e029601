//! The shared watch tree
//!
//! One node per path segment on the way to every watched path, plus the
//! subdirectories recursive handles cover and the targets of symlinks met
//! on the way. Existing directory nodes hold a native watch; everything else
//! piggybacks on its parent's.
//!
//! Nodes stay alive while they are *active*: a handle is attached, a
//! recursive handle covers them (from above or through a symlink), an
//! active node hangs below, an active symlink points at them, or an attached
//! handle's path was resolved through them. Inactive nodes are destroyed
//! after every detach, children first.

use ahash::{AHashMap, AHashSet};
use crossbeam_channel::Sender;
use osb_core::{SplitPath, WatchConfig};
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::backend::NativeBackend;
use crate::event::{Action, ChangeEvent};
use crate::handle::{Sink, Subscription, WatcherId};
use crate::node::{list_dir, stat, FileRecord, Node, NodeId, NodeKind};
use crate::stats::{render_tree, Stats, Status};
use crate::WatchError;

/// A change waiting to be handed to a handle once the tree lock is released
pub(crate) struct Delivery {
    pub sink: Arc<Sink>,
    pub event: ChangeEvent,
}

struct Attached {
    node: NodeId,
    sub: Subscription,
    /// Symlink nodes followed while resolving the handle's path
    via: Vec<NodeId>,
}

/// Public view of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub path: PathBuf,
    pub real_path: PathBuf,
    pub kind: NodeKind,
    /// Recursive handles at or above this node whose range reaches its children
    pub recursive: usize,
    /// Handles attached directly
    pub watchers: usize,
    pub children: Vec<String>,
    pub native: bool,
    /// Target path when this node is a linked symlink
    pub link: Option<PathBuf>,
}

pub(crate) struct Tree {
    pub config: WatchConfig,
    nodes: AHashMap<NodeId, Node>,
    pub roots: BTreeMap<PathBuf, NodeId>,
    /// Directory nodes by the real path of their native watch
    native: AHashMap<PathBuf, NodeId>,
    subscriptions: AHashMap<WatcherId, Attached>,
    backend: Box<dyn NativeBackend>,
    next_id: u64,
    pub stats: Stats,
    outbox: Vec<Delivery>,
    root_bus: Vec<Sender<ChangeEvent>>,
    /// Former link targets to re-check once the current operation finishes
    orphans: Vec<NodeId>,
    root_destroyed: bool,
    /// Nested link resolutions in progress
    linking: u32,
}

impl Tree {
    pub fn new(config: WatchConfig, backend: Box<dyn NativeBackend>) -> Self {
        debug!("Creating watch tree with {} backend", backend.name());
        Self {
            stats: Stats::new(config.stats_debounce()),
            config,
            nodes: AHashMap::new(),
            roots: BTreeMap::new(),
            native: AHashMap::new(),
            subscriptions: AHashMap::new(),
            backend,
            next_id: 1,
            outbox: Vec::new(),
            root_bus: Vec::new(),
            orphans: Vec::new(),
            root_destroyed: false,
            linking: 0,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn take_deliveries(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.outbox)
    }

    pub fn subscribe_all(&mut self, tx: Sender<ChangeEvent>) {
        self.root_bus.push(tx);
    }

    pub fn status(&self) -> Status {
        let counters = self.stats.counters();
        Status {
            nodes: counters.nodes,
            fswatchers: counters.fswatchers,
            watchers: counters.watchers,
            tree: render_tree(self),
        }
    }

    pub fn node_info(&self, id: NodeId) -> Option<NodeInfo> {
        let node = self.node(id)?;
        Some(NodeInfo {
            path: node.path.clone(),
            real_path: node.real_path.clone(),
            kind: node.kind,
            recursive: self.recursive_count(id),
            watchers: node.watchers.len(),
            children: node
                .children
                .keys()
                .map(|name| name.to_string_lossy().into_owned())
                .collect(),
            native: node.native.is_some(),
            link: node.link.and_then(|t| self.node(t)).map(|t| t.path.clone()),
        })
    }

    /// Node registered for `path`, following symlinks like `register` does
    pub fn lookup(&self, path: &Path) -> Result<Option<NodeId>, WatchError> {
        let split = osb_core::split(path)?;
        let (chain, complete) = self.walk(&split);
        Ok(if complete { chain.last().copied() } else { None })
    }

    /// Node owning the native watch on `path`
    pub fn native_node(&self, path: &Path) -> Option<NodeId> {
        self.native.get(path).copied()
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Ensure the node chain for `path` exists and optionally attach a handle
    pub fn register(
        &mut self,
        path: &Path,
        sub: Option<Subscription>,
    ) -> Result<NodeId, WatchError> {
        let split = osb_core::split(path)?;
        if let Some(sub) = &sub {
            if sub.recursion.is_recursive() && split.is_root() {
                return Err(WatchError::RecursiveRoot {
                    path: split.to_path_buf(),
                });
            }
        }

        let leaf = self.resolve(&split);
        if let Some(sub) = sub {
            let via = self.traversed_links(&split, leaf);
            self.watch(leaf, sub, via);
        }
        self.collect_orphans();
        Ok(leaf)
    }

    /// Detach a handle and tear down whatever is no longer needed
    ///
    /// Returns true when a root node was destroyed in the process.
    pub fn unregister(
        &mut self,
        path: &Path,
        watcher: Option<WatcherId>,
    ) -> Result<bool, WatchError> {
        let split = osb_core::split(path)?;
        self.root_destroyed = false;

        let (mut chain, _) = self.walk(&split);
        if let Some(id) = watcher {
            if let Some(node) = self.unwatch(id) {
                chain.push(node);
            }
        }
        for id in chain.into_iter().rev() {
            self.gc_upwards(id);
        }
        self.collect_orphans();

        Ok(self.root_destroyed)
    }

    /// Destroy every node and forget every handle
    pub fn reset(&mut self) {
        let roots: Vec<NodeId> = self.roots.values().copied().collect();
        for root in roots {
            self.destroy(root);
        }
        self.orphans.clear();
        self.subscriptions.clear();
        self.outbox.clear();
        debug!("Watch tree reset");
    }

    /// Get or create every node along `split`, following symlinks between
    /// segments. The leaf itself is not followed.
    fn resolve(&mut self, split: &SplitPath) -> NodeId {
        let mut current = self.root_node(&split.root);
        for segment in &split.segments {
            current = self.follow_link(current);
            current = match self.child(current, segment) {
                Some(child) => child,
                None => self.spawn_child(current, segment.clone(), false),
            };
        }
        current
    }

    /// Existing nodes along `split`, stopping at the first missing one.
    /// The flag is true when the leaf was reached.
    fn walk(&self, split: &SplitPath) -> (Vec<NodeId>, bool) {
        let mut chain = Vec::new();
        let Some(&root) = self.roots.get(&split.root) else {
            return (chain, false);
        };
        chain.push(root);

        let mut current = root;
        for segment in &split.segments {
            let followed = self.follow_link(current);
            if followed != current {
                chain.push(followed);
            }
            match self.child(followed, segment) {
                Some(child) => {
                    chain.push(child);
                    current = child;
                }
                None => return (chain, false),
            }
        }
        (chain, true)
    }

    /// Symlink nodes `split` passes through on its way to `leaf`, every hop
    /// of a chain included
    fn traversed_links(&self, split: &SplitPath, leaf: NodeId) -> Vec<NodeId> {
        let mut via = Vec::new();
        for id in self.walk(split).0 {
            let mut current = id;
            for _ in 0..self.config.max_link_depth {
                let Some(node) = self.node(current) else {
                    break;
                };
                if current == leaf || !node.kind.is_symlink() {
                    break;
                }
                if !via.contains(&current) {
                    via.push(current);
                }
                match node.link {
                    Some(target) if target != current => current = target,
                    _ => break,
                }
            }
        }
        via
    }

    fn root_node(&mut self, root: &Path) -> NodeId {
        if let Some(&id) = self.roots.get(root) {
            return id;
        }
        let id = self.alloc(root.as_os_str().to_os_string(), root.to_path_buf(), None);
        self.roots.insert(root.to_path_buf(), id);
        self.restat(id);
        self.init(id, false);
        id
    }

    fn alloc(&mut self, name: OsString, path: PathBuf, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;

        trace!("Creating node {:?} for {}", id, path.display());
        self.nodes.insert(id, Node::new(id, name.clone(), path, parent));
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.insert(name, id);
        }
        self.stats.node_created();
        id
    }

    pub(crate) fn child(&self, id: NodeId, name: &OsStr) -> Option<NodeId> {
        self.node(id)?.children.get(name).copied()
    }

    /// Jump from a symlink node to its target, hop by hop
    fn follow_link(&self, id: NodeId) -> NodeId {
        let mut current = id;
        for _ in 0..self.config.max_link_depth {
            match self.node(current) {
                Some(node) if node.kind.is_symlink() => match node.link {
                    Some(target) if target != current => current = target,
                    _ => break,
                },
                _ => break,
            }
        }
        current
    }

    /// Create a child node and stat it; no native work yet
    pub(crate) fn create_child(&mut self, parent: NodeId, name: OsString) -> NodeId {
        let path = match self.node(parent) {
            Some(node) => node.path.join(&name),
            None => PathBuf::from(&name),
        };
        let id = self.alloc(name, path, Some(parent));
        self.restat(id);
        id
    }

    fn spawn_child(&mut self, parent: NodeId, name: OsString, announce: bool) -> NodeId {
        let id = self.create_child(parent, name);
        self.settle(id, announce);
        id
    }

    /// Bring a node in line with what is on disk, then expand below it
    pub(crate) fn settle(&mut self, id: NodeId, announce: bool) {
        self.init(id, announce);
        self.descend(id, announce);
    }

    pub(crate) fn restat(&mut self, id: NodeId) {
        let max_link_depth = self.config.max_link_depth;
        let Some(node) = self.node_mut(id) else {
            return;
        };
        let st = stat(&node.path, max_link_depth);
        node.kind = st.kind;
        node.real_path = st.real_path;
    }

    /// Open or close the native watch to match the node's kind and (re)link
    /// symlinks.
    ///
    /// With `announce`, every entry found in a fresh listing is reported as
    /// an `add` and symlinks pointing here are told their target appeared.
    fn init(&mut self, id: NodeId, announce: bool) {
        let Some(node) = self.node(id) else {
            return;
        };
        let kind = node.kind;
        let has_native = node.native.is_some();
        let path = node.path.clone();

        if kind.is_dir() && !kind.is_symlink() {
            if !has_native {
                self.open_native(id);
                let listing = list_dir(&path);
                let now = Instant::now();
                if let Some(node) = self.node_mut(id) {
                    node.files = listing
                        .iter()
                        .map(|(name, kind)| {
                            let record = if announce {
                                FileRecord {
                                    action: Action::Add,
                                    at: Some(now),
                                    kind: *kind,
                                }
                            } else {
                                FileRecord::listed(*kind)
                            };
                            (name.clone(), record)
                        })
                        .collect();
                }

                if announce {
                    let mut names: Vec<OsString> = listing.into_iter().map(|(n, _)| n).collect();
                    names.sort();
                    for name in names {
                        let event = ChangeEvent::new(Action::Add, path.join(&name));
                        let child = self.child(id, &name);
                        if let Some(child) = child {
                            self.deliver_local(child, &event);
                        }
                        self.notify(id, &event);
                        if let Some(child) = child {
                            self.restat(child);
                            self.settle(child, true);
                        }
                    }
                }
            }
        } else if has_native {
            self.close_native(id);
            if let Some(node) = self.node_mut(id) {
                node.files.clear();
            }
        }

        if kind.is_symlink() {
            self.link(id);
        } else {
            self.unlink(id);
        }

        if announce {
            self.notify_links(id);
        }
    }

    /// Create nodes for the subdirectories a recursive handle covers
    fn descend(&mut self, id: NodeId, announce: bool) {
        let mut seen = AHashSet::new();
        self.descend_inner(id, announce, &mut seen);
    }

    fn descend_inner(&mut self, id: NodeId, announce: bool, seen: &mut AHashSet<NodeId>) {
        if !seen.insert(id) || self.coverage(id) == 0 {
            return;
        }
        let Some(node) = self.node(id) else {
            return;
        };
        if node.kind.is_symlink() {
            // The target's subtree is already on disk; only the link is new
            if let Some(target) = node.link {
                self.descend_inner(target, false, seen);
            }
            return;
        }

        for (name, kind) in node.live_entries() {
            if !kind.is_descendable() {
                continue;
            }
            match self.child(id, &name) {
                Some(child) => self.descend_inner(child, announce, seen),
                None => {
                    self.spawn_child(id, name, announce);
                }
            }
        }
    }

    fn open_native(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        let real_path = node.real_path.clone();
        match self.backend.watch(&real_path) {
            Ok(()) => {
                trace!("Native watch opened on {}", real_path.display());
                if let Some(node) = self.node_mut(id) {
                    node.native = Some(real_path.clone());
                }
                self.native.insert(real_path, id);
                self.stats.native_opened();
            }
            Err(e) => warn!("{}", e),
        }
    }

    /// Close the native watch where it was opened; `real_path` may have
    /// moved on since, e.g. when the directory was replaced by a symlink
    pub(crate) fn close_native(&mut self, id: NodeId) {
        let Some(real_path) = self.node_mut(id).and_then(|node| node.native.take()) else {
            return;
        };

        if let Err(e) = self.backend.unwatch(&real_path) {
            // The directory is usually already gone
            trace!("{}", e);
        }
        if self.native.get(&real_path) == Some(&id) {
            self.native.remove(&real_path);
        }
        self.stats.native_closed();
    }

    /// Point a symlink node at the node for its target
    fn link(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        if node.real_path == node.path {
            // Loop or hop cap: nothing to follow
            self.unlink(id);
            return;
        }
        let target_path = node.real_path.clone();
        if let Some(current) = node.link.and_then(|t| self.node(t)) {
            if current.path == target_path {
                return;
            }
        }
        self.unlink(id);

        if self.linking >= self.config.max_link_depth {
            warn!(
                "Symlink chain too deep at {}, not following",
                target_path.display()
            );
            return;
        }
        let split = match osb_core::split(&target_path) {
            Ok(split) => split,
            Err(e) => {
                debug!("Cannot follow link to {}: {}", target_path.display(), e);
                return;
            }
        };

        self.linking += 1;
        let target = self.resolve(&split);
        self.linking -= 1;

        if target == id || !self.nodes.contains_key(&id) {
            return;
        }
        if let Some(node) = self.node_mut(id) {
            node.link = Some(target);
        }
        if let Some(node) = self.node_mut(target) {
            node.links.insert(id);
        }
        trace!("Linked {:?} -> {}", id, target_path.display());
    }

    pub(crate) fn unlink(&mut self, id: NodeId) {
        let Some(target) = self.node_mut(id).and_then(|node| node.link.take()) else {
            return;
        };
        if let Some(node) = self.node_mut(target) {
            node.links.remove(&id);
        }
        self.orphans.push(target);
    }

    /// Tell every symlink pointing at `id` that its target changed
    pub(crate) fn notify_links(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        let links: Vec<NodeId> = node.links.iter().copied().collect();
        for link in links {
            self.restat(link);
            let Some(path) = self.node(link).map(|n| n.path.clone()) else {
                continue;
            };
            let event = ChangeEvent::new(Action::Change, path);
            self.deliver_local(link, &event);
            if let Some(parent) = self.node(link).and_then(|n| n.parent) {
                self.notify(parent, &event);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Handles
    // ---------------------------------------------------------------------

    fn watch(&mut self, id: NodeId, sub: Subscription, via: Vec<NodeId>) {
        let watcher = sub.id;
        let Some(node) = self.node_mut(id) else {
            return;
        };
        if node.watchers.contains(&watcher) {
            return;
        }
        node.watchers.push(watcher);
        debug!("Attached watcher {:?} to {}", watcher, node.path.display());

        self.subscriptions
            .insert(watcher, Attached { node: id, sub, via });
        self.stats.watcher_attached();
        self.descend(id, false);
    }

    /// Remove a handle; returns the node it was attached to
    fn unwatch(&mut self, watcher: WatcherId) -> Option<NodeId> {
        let attached = self.subscriptions.remove(&watcher)?;
        let id = attached.node;
        if let Some(node) = self.node_mut(id) {
            node.watchers.retain(|w| *w != watcher);
            debug!("Detached watcher {:?} from {}", watcher, node.path.display());
        }
        self.stats.watcher_detached();
        self.prune(id);
        Some(id)
    }

    /// Destroy inactive nodes below `id`
    fn prune(&mut self, id: NodeId) {
        let children: Vec<NodeId> = match self.node(id) {
            Some(node) => node.children.values().copied().collect(),
            None => return,
        };
        for child in children {
            self.prune(child);
            if self.nodes.contains_key(&child) && !self.is_active(child) {
                self.destroy(child);
            }
        }
    }

    /// Highest number of levels below `id` some handle still covers
    pub(crate) fn coverage(&self, id: NodeId) -> u32 {
        self.reach(id).values().copied().max().unwrap_or(0)
    }

    /// Recursive handles whose range still covers the children of `id`
    pub(crate) fn recursive_count(&self, id: NodeId) -> usize {
        self.reach(id).values().filter(|range| **range > 0).count()
    }

    /// Remaining range of every handle attached at or above `id`, or above
    /// a symlink leading to `id` or one of its ancestors
    fn reach(&self, id: NodeId) -> AHashMap<WatcherId, u32> {
        let mut ranges = AHashMap::new();
        let mut seen = AHashSet::new();
        self.reach_inner(id, 0, 0, &mut seen, &mut ranges);
        ranges
    }

    fn reach_inner(
        &self,
        id: NodeId,
        mut distance: u32,
        hops: u32,
        seen: &mut AHashSet<NodeId>,
        ranges: &mut AHashMap<WatcherId, u32>,
    ) {
        // Ancestors before symlink detours
        let mut pending = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current.and_then(|c| self.node(c)) {
            if !seen.insert(node.id) {
                break;
            }
            for watcher in &node.watchers {
                if let Some(attached) = self.subscriptions.get(watcher) {
                    let range = attached.sub.recursion.remaining(distance);
                    let best = ranges.entry(*watcher).or_insert(0);
                    *best = (*best).max(range);
                }
            }
            pending.extend(node.links.iter().map(|link| (*link, distance)));
            distance = distance.saturating_add(1);
            current = node.parent;
        }

        if hops >= self.config.max_link_depth {
            return;
        }
        for (link, distance) in pending {
            self.reach_inner(link, distance, hops + 1, seen, ranges);
        }
    }

    // ---------------------------------------------------------------------
    // Lifetime
    // ---------------------------------------------------------------------

    fn is_active(&self, id: NodeId) -> bool {
        let mut seen = AHashSet::new();
        self.active_inner(id, &mut seen)
    }

    fn active_inner(&self, id: NodeId, seen: &mut AHashSet<NodeId>) -> bool {
        if !seen.insert(id) {
            return false;
        }
        let Some(node) = self.node(id) else {
            return false;
        };
        if !node.watchers.is_empty() {
            return true;
        }
        if let Some(parent) = node.parent {
            if self.coverage(parent) > 0 {
                return true;
            }
        }
        if self.subscriptions.values().any(|a| a.via.contains(&id)) {
            return true;
        }
        node.children.values().any(|c| self.active_inner(*c, seen))
            || node.links.iter().any(|l| self.active_inner(*l, seen))
    }

    /// Whether a deleted node must survive: someone waits for it to come back
    pub(crate) fn is_pinned(&self, id: NodeId) -> bool {
        match self.node(id) {
            Some(node) => {
                !node.watchers.is_empty()
                    || !node.links.is_empty()
                    || node.children.values().any(|c| self.is_pinned(*c))
            }
            None => false,
        }
    }

    /// Destroy inactive nodes from `id` up towards the root
    fn gc_upwards(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(id) = current {
            if !self.nodes.contains_key(&id) || self.is_active(id) {
                break;
            }
            current = self.node(id).and_then(|n| n.parent);
            self.destroy(id);
        }
    }

    pub(crate) fn collect_orphans(&mut self) {
        while let Some(id) = self.orphans.pop() {
            self.gc_upwards(id);
        }
    }

    /// Remove a node and its whole subtree
    pub(crate) fn destroy(&mut self, id: NodeId) {
        let children: Vec<NodeId> = match self.node(id) {
            Some(node) => node.children.values().copied().collect(),
            None => return,
        };
        for child in children {
            self.destroy(child);
        }

        self.close_native(id);
        self.unlink(id);

        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        trace!("Destroyed node {:?} for {}", node.id, node.path.display());

        for source in &node.links {
            if let Some(source) = self.nodes.get_mut(source) {
                source.link = None;
            }
        }
        for watcher in &node.watchers {
            self.subscriptions.remove(watcher);
            self.stats.watcher_detached();
        }
        match node.parent {
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(&parent) {
                    parent.children.remove(&node.name);
                }
            }
            None => {
                self.roots.remove(&node.path);
                self.root_destroyed = true;
            }
        }
        self.stats.node_destroyed();
    }

    // ---------------------------------------------------------------------
    // Delivery
    // ---------------------------------------------------------------------

    /// Queue `event` for every handle attached to `id`, whatever its recursion
    pub(crate) fn deliver_local(&mut self, id: NodeId, event: &ChangeEvent) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        for watcher in &node.watchers {
            if let Some(attached) = self.subscriptions.get(watcher) {
                self.outbox.push(Delivery {
                    sink: attached.sub.sink.clone(),
                    event: event.clone(),
                });
            }
        }
    }

    /// Deliver a change inside directory `dir` to every handle that sees it
    ///
    /// Ancestors are visited before symlinks pointing here, and each node
    /// at most once.
    pub(crate) fn notify(&mut self, dir: NodeId, event: &ChangeEvent) {
        let mut visited = AHashSet::new();
        self.propagate(dir, event, 0, &mut visited);
    }

    fn propagate(
        &mut self,
        id: NodeId,
        event: &ChangeEvent,
        depth: u32,
        visited: &mut AHashSet<NodeId>,
    ) {
        if !visited.insert(id) {
            return;
        }
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        for watcher in &node.watchers {
            if let Some(attached) = self.subscriptions.get(watcher) {
                if attached.sub.recursion.covers(depth) {
                    self.outbox.push(Delivery {
                        sink: attached.sub.sink.clone(),
                        event: event.clone(),
                    });
                }
            }
        }
        let parent = node.parent;
        let path = node.path.clone();
        let links: Vec<NodeId> = node.links.iter().copied().collect();

        match parent {
            Some(parent) => self.propagate(parent, event, depth + 1, visited),
            None => self.publish_root(event),
        }

        for link in links {
            let Some(link_path) = self.node(link).map(|n| n.path.clone()) else {
                continue;
            };
            let relayed = event.rebase(&path, &link_path);
            self.propagate(link, &relayed, depth, visited);
        }
    }

    fn publish_root(&mut self, event: &ChangeEvent) {
        self.root_bus.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn assert_counters(&self) {
        let counters = self.stats.counters();
        assert_eq!(counters.nodes, self.nodes.len(), "node count drifted");
        assert_eq!(counters.fswatchers, self.native.len(), "native count drifted");
        let watchers: usize = self.nodes.values().map(|n| n.watchers.len()).sum();
        assert_eq!(counters.watchers, watchers, "watcher count drifted");
        assert_eq!(self.subscriptions.len(), watchers);
    }
}
