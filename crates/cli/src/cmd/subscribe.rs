//! Watch a path through the running daemon

use anyhow::{Context, Result};
use cli_lib::ipc::{IpcClient, Request, Response};
use cli_lib::{daemon, util};
use osb_core::Config;
use watcher::ChangeEvent;

use super::WatchArgs;

pub async fn run(config: Config, args: WatchArgs) -> Result<()> {
    let socket_path = config.daemon.socket_path();
    if !daemon::is_running(&socket_path) {
        anyhow::bail!("Daemon is not running (start it with 'osb start')");
    }

    // The daemon resolves paths against its own working directory
    let path = osb_core::absolutize(&args.path)
        .with_context(|| format!("Invalid path {}", args.path.display()))?;
    let options = args.options();

    let mut client = IpcClient::connect(&socket_path).await?;
    client
        .send(&Request::Subscribe {
            path,
            recursive: options.recursive,
            depth: options.depth,
        })
        .await?;

    let mut subscription = None;
    let mut seen = 0usize;
    loop {
        let response = tokio::select! {
            response = client.recv() => response?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(response) = response else {
            anyhow::bail!("Daemon closed the connection");
        };

        match response {
            Response::Subscribed { id, path } => {
                eprintln!("Subscribed to {} as {} (Ctrl-C to stop)", path.display(), id);
                subscription = Some(id);
            }
            Response::Event {
                action,
                filename,
                file,
                ..
            } => {
                let event = ChangeEvent {
                    action,
                    filename,
                    file,
                };
                util::print_event(&event, args.json)?;
                seen += 1;
                if args.count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
            Response::Error { id: None, message } if subscription.is_none() => {
                anyhow::bail!("{}", message);
            }
            Response::Error { message, .. } => eprintln!("error: {}", message),
            other => tracing::debug!("Ignoring {:?}", other),
        }
    }

    if let Some(id) = subscription {
        // Best effort; closing the socket releases it anyway
        let _ = client.send(&Request::Unsubscribe { id }).await;
    }
    Ok(())
}
