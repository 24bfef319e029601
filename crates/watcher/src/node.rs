//! Watch tree nodes
//!
//! A [`Node`] tracks the watched state of one filesystem path. Nodes live in
//! an arena owned by the tree and refer to each other by [`NodeId`]:
//! `children` and `parent` form the ownership tree, while `link`/`links`
//! are non-owning symlink cross-references.

use ahash::AHashMap;
use bitflags::bitflags;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::event::Action;
use crate::handle::WatcherId;

bitflags! {
    /// Filesystem type of a path; the empty set means it does not exist
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeKind: u8 {
        const DIRECTORY = 1;
        const FILE = 2;
        const SYMLINK = 4;
    }
}

impl NodeKind {
    pub const DOES_NOT_EXIST: NodeKind = NodeKind::empty();

    pub fn exists(&self) -> bool {
        !self.is_empty()
    }

    pub fn is_dir(&self) -> bool {
        self.contains(NodeKind::DIRECTORY)
    }

    pub fn is_symlink(&self) -> bool {
        self.contains(NodeKind::SYMLINK)
    }

    /// Entries recursive expansion creates nodes for
    pub fn is_descendable(&self) -> bool {
        self.intersects(NodeKind::DIRECTORY | NodeKind::SYMLINK)
    }

    pub(crate) fn from_file_type(file_type: fs::FileType) -> Self {
        if file_type.is_symlink() {
            NodeKind::SYMLINK
        } else if file_type.is_dir() {
            NodeKind::DIRECTORY
        } else {
            NodeKind::FILE
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        if !self.exists() {
            "missing"
        } else if self.is_symlink() && self.is_dir() {
            "dir-link"
        } else if self.is_symlink() {
            "link"
        } else if self.is_dir() {
            "dir"
        } else {
            "file"
        }
    }
}

/// Arena index of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) u64);

/// Last thing seen for a directory entry
#[derive(Debug, Clone, Copy)]
pub(crate) struct FileRecord {
    pub action: Action,
    /// When the event was reported; `None` for entries from a silent listing
    pub at: Option<Instant>,
    pub kind: NodeKind,
}

impl FileRecord {
    pub fn listed(kind: NodeKind) -> Self {
        Self {
            action: Action::Add,
            at: None,
            kind,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.action == Action::Delete
    }
}

pub(crate) struct Node {
    pub id: NodeId,
    /// Key in the parent's `children` (the root string for top-level nodes)
    pub name: OsString,
    pub path: PathBuf,
    /// Resolved target for symlinks, `path` otherwise
    pub real_path: PathBuf,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: BTreeMap<OsString, NodeId>,
    /// Handles attached directly to this node, in attach order
    pub watchers: Vec<WatcherId>,
    /// Target node when this node is a symlink
    pub link: Option<NodeId>,
    /// Symlink nodes pointing at this node
    pub links: BTreeSet<NodeId>,
    pub files: AHashMap<OsString, FileRecord>,
    /// Path the native watch was opened on, if one is open
    pub native: Option<PathBuf>,
}

impl Node {
    pub fn new(id: NodeId, name: OsString, path: PathBuf, parent: Option<NodeId>) -> Self {
        Self {
            id,
            name,
            real_path: path.clone(),
            path,
            kind: NodeKind::DOES_NOT_EXIST,
            parent,
            children: BTreeMap::new(),
            watchers: Vec::new(),
            link: None,
            links: BTreeSet::new(),
            files: AHashMap::new(),
            native: None,
        }
    }

    /// Directory entries still present, sorted by name
    pub fn live_entries(&self) -> Vec<(OsString, NodeKind)> {
        let mut entries: Vec<_> = self
            .files
            .iter()
            .filter(|(_, record)| !record.is_deleted())
            .map(|(name, record)| (name.clone(), record.kind))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// Result of statting a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Stat {
    pub kind: NodeKind,
    /// Where a symlink points; the path itself for non-links and for links
    /// that loop or exceed the hop cap
    pub real_path: PathBuf,
}

/// Stat `path` without failing
///
/// Symlinks are resolved; a broken link keeps the computed (missing) target
/// so its later creation can be detected.
pub(crate) fn stat(path: &Path, max_link_depth: u32) -> Stat {
    let missing = || Stat {
        kind: NodeKind::DOES_NOT_EXIST,
        real_path: path.to_path_buf(),
    };

    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(_) => return missing(),
    };

    if !meta.file_type().is_symlink() {
        return Stat {
            kind: NodeKind::from_file_type(meta.file_type()),
            real_path: path.to_path_buf(),
        };
    }

    match fs::canonicalize(path) {
        Ok(real) => {
            let kind = fs::metadata(&real)
                .map(|meta| NodeKind::from_file_type(meta.file_type()))
                .unwrap_or_default();
            Stat {
                kind: kind | NodeKind::SYMLINK,
                real_path: real,
            }
        }
        Err(_) => {
            Stat {
                kind: NodeKind::SYMLINK,
                real_path: resolve_link_text(path, max_link_depth)
                    .unwrap_or_else(|| path.to_path_buf()),
            }
        }
    }
}

/// Follow raw link text hop by hop without requiring the target to exist
///
/// Returns `None` when the chain is still a link after `max_hops`.
pub(crate) fn resolve_link_text(path: &Path, max_hops: u32) -> Option<PathBuf> {
    let mut current = path.to_path_buf();
    for _ in 0..max_hops {
        let target = fs::read_link(&current).ok()?;
        let joined = match current.parent() {
            Some(parent) if target.is_relative() => parent.join(&target),
            _ => target,
        };
        current = osb_core::absolutize(&joined).unwrap_or(joined);

        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => continue,
            _ => return Some(current),
        }
    }
    None
}

/// List a directory; unreadable directories list as empty
pub(crate) fn list_dir(path: &Path) -> Vec<(OsString, NodeKind)> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Cannot list {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            let kind = entry
                .file_type()
                .map(NodeKind::from_file_type)
                .unwrap_or(NodeKind::FILE);
            (entry.file_name(), kind)
        })
        .collect()
}
