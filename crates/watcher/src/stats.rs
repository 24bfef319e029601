//! Live counters and the diagnostic tree
//!
//! Counters move with every node creation, native watch open/close and
//! handle attach/detach. Re-rendering the tree for the log is debounced:
//! each mutation restarts the quiet period, and the dispatcher renders once
//! the tree has been still for the configured debounce.

use serde::Serialize;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use crate::node::NodeId;
use crate::tree::Tree;

/// Snapshot returned by [`Engine::status`](crate::Engine::status)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Live tree nodes
    pub nodes: usize,
    /// Open native watches
    pub fswatchers: usize,
    /// Attached watcher handles
    pub watchers: usize,
    /// Rendered tree
    pub tree: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Counters {
    pub nodes: usize,
    pub fswatchers: usize,
    pub watchers: usize,
}

pub(crate) struct Stats {
    counters: Counters,
    debounce: Duration,
    dirty_since: Option<Instant>,
}

impl Stats {
    pub fn new(debounce: Duration) -> Self {
        Self {
            counters: Counters::default(),
            debounce,
            dirty_since: None,
        }
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn node_created(&mut self) {
        self.counters.nodes += 1;
        self.touch();
    }

    pub fn node_destroyed(&mut self) {
        self.counters.nodes = self.counters.nodes.saturating_sub(1);
        self.touch();
    }

    pub fn native_opened(&mut self) {
        self.counters.fswatchers += 1;
        self.touch();
    }

    pub fn native_closed(&mut self) {
        self.counters.fswatchers = self.counters.fswatchers.saturating_sub(1);
        self.touch();
    }

    pub fn watcher_attached(&mut self) {
        self.counters.watchers += 1;
        self.touch();
    }

    pub fn watcher_detached(&mut self) {
        self.counters.watchers = self.counters.watchers.saturating_sub(1);
        self.touch();
    }

    fn touch(&mut self) {
        self.dirty_since = Some(Instant::now());
    }

    /// True once per burst, after `debounce` without further changes
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.dirty_since {
            Some(since) if now.saturating_duration_since(since) >= self.debounce => {
                self.dirty_since = None;
                true
            }
            _ => false,
        }
    }
}

/// Render every root as an ASCII tree
pub(crate) fn render_tree(tree: &Tree) -> String {
    let mut out = String::new();
    for &root in tree.roots.values() {
        render_node(tree, root, "", None, &mut out);
    }
    out
}

fn render_node(tree: &Tree, id: NodeId, prefix: &str, is_last: Option<bool>, out: &mut String) {
    let Some(node) = tree.node(id) else {
        return;
    };

    let (branch, child_prefix) = match is_last {
        None => (String::new(), String::new()),
        Some(true) => (format!("{}└── ", prefix), format!("{}    ", prefix)),
        Some(false) => (format!("{}├── ", prefix), format!("{}│   ", prefix)),
    };

    let mut line = format!("{}{} [{}]", branch, node.name.to_string_lossy(), node.kind.label());
    if node.native.is_some() {
        line.push_str(" native");
    }
    if !node.watchers.is_empty() {
        let _ = write!(line, " watchers={}", node.watchers.len());
    }
    let recursive = tree.recursive_count(id);
    if recursive > 0 {
        let _ = write!(line, " recursive={}", recursive);
    }
    if let Some(target) = node.link.and_then(|link| tree.node(link)) {
        let _ = write!(line, " -> {}", target.path.display());
    }
    let _ = writeln!(out, "{}", line);

    let children: Vec<NodeId> = node.children.values().copied().collect();
    for (i, child) in children.iter().enumerate() {
        render_node(tree, *child, &child_prefix, Some(i + 1 == children.len()), out);
    }
}
