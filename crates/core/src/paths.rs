//! Path canonicalization for the watch tree
//!
//! Every watched path is turned into an absolute, lexically normalized path
//! and split into the filesystem root it hangs off (`/` or a drive prefix
//! such as `C:\`) plus the directory segments below it.

use crate::{CoreError, Result};
use smallvec::SmallVec;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// An absolute path split into its root and segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPath {
    /// Filesystem root (`/`, `C:\`, `\\server\share\`)
    pub root: PathBuf,
    /// Normal components below the root, in order
    pub segments: SmallVec<[OsString; 8]>,
}

impl SplitPath {
    /// True when the path is the filesystem root itself
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Rebuild the absolute path
    pub fn to_path_buf(&self) -> PathBuf {
        let mut path = self.root.clone();
        for segment in &self.segments {
            path.push(segment);
        }
        path
    }
}

/// Make a path absolute without touching the filesystem
///
/// - Relative paths are resolved against the current directory
/// - `.` components are dropped
/// - `..` pops the previous segment (never above the root)
///
/// Symlinks are deliberately not resolved; the watch tree tracks them itself.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    Ok(split(path)?.to_path_buf())
}

/// Canonicalize `path` and split it into `(root, segments)`
pub fn split(path: &Path) -> Result<SplitPath> {
    if path.as_os_str().is_empty() {
        return Err(CoreError::EmptyPath);
    }

    let absolute = if path.has_root() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir().map_err(|source| CoreError::CurrentDir {
            path: path.to_path_buf(),
            source,
        })?;
        cwd.join(path)
    };

    let mut root = PathBuf::new();
    let mut segments: SmallVec<[OsString; 8]> = SmallVec::new();

    for component in absolute.components() {
        match component {
            Component::Prefix(prefix) => root.push(prefix.as_os_str()),
            Component::RootDir => root.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                segments.pop();
            }
            Component::Normal(name) => segments.push(name.to_os_string()),
        }
    }

    Ok(SplitPath { root, segments })
}
