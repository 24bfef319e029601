//! Turning native events into deliveries
//!
//! A native event only says "something happened to `name` in directory
//! `dir`". The entry is re-stated and compared with the last record kept for
//! it to classify the change as add, change or delete. Repeated change
//! events inside the dedup window are dropped.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::trace;

use crate::event::{Action, ChangeEvent};
use crate::node::{stat, FileRecord, NodeId, NodeKind};
use crate::tree::Tree;

impl Tree {
    /// Dispatch a raw native path to the directory watch that reported it
    pub fn route(&mut self, path: &Path) {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        match self.native_node(parent) {
            Some(dir) => self.on_fs_event(dir, name),
            None => trace!("No native watch for {}", parent.display()),
        }
        self.collect_orphans();
    }

    /// Something happened to entry `name` of directory node `dir`
    pub(crate) fn on_fs_event(&mut self, dir: NodeId, name: &OsStr) {
        let Some(node) = self.node(dir) else {
            return;
        };
        let dir_path = node.path.clone();
        let previous = node.files.get(name).copied();

        // The directory itself may be gone; its parent reports that
        let own = stat(&dir_path, self.config.max_link_depth);
        if !own.kind.is_dir() || own.kind.is_symlink() {
            trace!("Ignoring event in vanished {}", dir_path.display());
            return;
        }

        let file = dir_path.join(name);
        let current = fs::symlink_metadata(&file)
            .ok()
            .map(|meta| NodeKind::from_file_type(meta.file_type()));

        let action = match (current, previous) {
            (None, Some(prev)) if !prev.is_deleted() => Action::Delete,
            // Never seen, or already reported gone
            (None, _) => return,
            (Some(_), Some(prev)) if !prev.is_deleted() => Action::Change,
            (Some(_), _) => Action::Add,
        };

        let now = Instant::now();
        // Only repeated changes collapse; an add or delete always flips the
        // entry's recorded state and must be reported
        if action == Action::Change {
            if let Some(at) = previous.and_then(|p| p.at) {
                if now.saturating_duration_since(at) < self.config.dedup_window() {
                    trace!("Dropping duplicate change for {}", file.display());
                    return;
                }
            }
        }

        let kind = current
            .or(previous.map(|p| p.kind))
            .unwrap_or(NodeKind::DOES_NOT_EXIST);
        if let Some(node) = self.node_mut(dir) {
            node.files.insert(
                name.to_os_string(),
                FileRecord {
                    action,
                    at: Some(now),
                    kind,
                },
            );
        }

        let event = ChangeEvent::new(action, file);
        let child = self.child(dir, name);

        if action == Action::Delete {
            if let Some(child) = child {
                self.child_deleted(child, &event);
            }
            self.notify(dir, &event);
            return;
        }

        // New subdirectories under a recursive handle get a node of their own
        let spawned = match child {
            None if action == Action::Add
                && kind.is_descendable()
                && self.recursive_count(dir) > 0 =>
            {
                Some(self.create_child(dir, name.to_os_string()))
            }
            _ => None,
        };

        if let Some(child) = child {
            self.deliver_local(child, &event);
        }
        self.notify(dir, &event);

        if let Some(child) = child {
            self.restat(child);
            self.settle(child, action == Action::Add);
        } else if let Some(spawned) = spawned {
            self.settle(spawned, true);
        }
    }

    /// Report a deleted child to its own handles and drop it unless pinned
    fn child_deleted(&mut self, child: NodeId, event: &ChangeEvent) {
        self.on_deleted(child);
        self.deliver_local(child, event);
        if !self.is_pinned(child) {
            self.destroy(child);
        }
    }

    /// `id` disappeared: report everything below it as deleted, deepest
    /// first, then release its native watch.
    pub(crate) fn on_deleted(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        let path = node.path.clone();
        let entries = node.live_entries();

        let now = Instant::now();
        let mut handled = BTreeSet::new();
        for (name, kind) in entries {
            if let Some(node) = self.node_mut(id) {
                node.files.insert(
                    name.clone(),
                    FileRecord {
                        action: Action::Delete,
                        at: Some(now),
                        kind,
                    },
                );
            }
            let event = ChangeEvent::new(Action::Delete, path.join(&name));
            if let Some(child) = self.child(id, &name) {
                self.child_deleted(child, &event);
            }
            self.notify(id, &event);
            handled.insert(name);
        }

        // Nodes waiting for entries that never showed up in the listing
        let waiting: Vec<NodeId> = match self.node(id) {
            Some(node) => node
                .children
                .iter()
                .filter(|(name, _)| !handled.contains(*name))
                .map(|(_, child)| *child)
                .collect(),
            None => return,
        };
        for child in waiting {
            self.on_deleted(child);
        }

        self.close_native(id);
        self.unlink(id);
        if let Some(node) = self.node_mut(id) {
            node.files.clear();
            node.kind = NodeKind::DOES_NOT_EXIST;
        }
        self.notify_links(id);
    }
}
