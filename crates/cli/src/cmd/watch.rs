//! Watch a path with an in-process engine

use anyhow::{Context, Result};
use cli_lib::util;
use osb_core::Config;
use tokio::sync::mpsc;
use tracing::warn;
use watcher::{ChangeEvent, Engine, Watcher};

use super::WatchArgs;

pub async fn run(config: Config, args: WatchArgs) -> Result<()> {
    let engine = Engine::new(config.watch).context("Failed to start watch engine")?;
    let watcher = Watcher::prepare(&engine, &args.path, args.options())
        .with_context(|| format!("Cannot watch {}", args.path.display()))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<ChangeEvent>();
    watcher.on_change(move |event: &ChangeEvent| {
        tx.send(event.clone())
            .map_err(|_| anyhow::anyhow!("output closed"))
    });
    watcher.on_error(|error, event| match event {
        Some(event) => warn!("{} ({})", error, event.file.display()),
        None => warn!("{}", error),
    });
    watcher
        .open()
        .with_context(|| format!("Cannot watch {}", args.path.display()))?;
    eprintln!("Watching {} (Ctrl-C to stop)", watcher.path().display());

    let mut seen = 0usize;
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                util::print_event(&event, args.json)?;
                seen += 1;
                if args.count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    watcher.close();
    Ok(())
}
