//! Library half of the `osb` binary, shared with its integration tests

pub mod daemon;
pub mod ipc;
pub mod locks;
pub mod logging;
pub mod session;
pub mod util;
