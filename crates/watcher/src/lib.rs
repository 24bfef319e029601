//! Filesystem watching for osbridge
//!
//! Many independent [`Watcher`] handles share one watch tree per
//! [`Engine`]:
//! - One native, non-recursive watch per directory that matters, no matter
//!   how many handles are interested in it
//! - Paths that do not exist yet can be watched and report `add` when they
//!   appear
//! - Recursive handles with optional depth limits
//! - Symlinks are followed, and changes under a link target are reported
//!   under the link path as well
//! - Duplicate native events are collapsed inside a short window
//!
//! ```no_run
//! use watcher::{Engine, WatchOptions, Watcher, WatcherEvent};
//!
//! let engine = Engine::new(Default::default())?;
//! let handle = Watcher::new(&engine, "/tmp/project", WatchOptions::recursive())?;
//! for event in handle.events() {
//!     if let WatcherEvent::Change(change) = event {
//!         println!("{} {}", change.action, change.file.display());
//!     }
//! }
//! # Ok::<(), watcher::WatchError>(())
//! ```

mod backend;
mod engine;
mod error;
mod event;
mod handle;
mod node;
mod propagate;
mod stats;
mod tree;

pub use backend::{NativeBackend, NotifyBackend, NullBackend};
pub use engine::Engine;
pub use error::WatchError;
pub use event::{Action, ChangeEvent, WatcherEvent};
pub use handle::{Recursion, WatchOptions, Watcher, WatcherId};
pub use node::{NodeId, NodeKind};
pub use stats::Status;
pub use tree::NodeInfo;

/// Re-exported so callers can build events for [`Engine::process_event`]
pub use notify;
