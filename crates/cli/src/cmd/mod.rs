//! CLI command implementations

pub mod start;
pub mod status;
pub mod stop;
pub mod subscribe;
pub mod watch;

use clap::Args;
use std::path::PathBuf;
use watcher::WatchOptions;

/// Arguments shared by `watch` and `subscribe`
#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// File or directory to watch
    pub path: PathBuf,

    /// Also watch subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Report N directory levels, the watched one counting as the first (implies --recursive)
    #[arg(short, long)]
    pub depth: Option<u32>,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Exit after N events
    #[arg(short = 'n', long)]
    pub count: Option<usize>,
}

impl WatchArgs {
    pub fn options(&self) -> WatchOptions {
        WatchOptions {
            recursive: self.recursive || self.depth.is_some(),
            depth: self.depth,
        }
    }
}
