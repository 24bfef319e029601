//! Daemon lifecycle management
//!
//! The daemon owns one watch engine and serves subscriptions over a Unix
//! socket in `<state_dir>/daemon.sock`. Only one daemon runs per state
//! directory; see [`DaemonLock`].

use anyhow::{Context, Result};
use osb_core::{Config, StartupWatch};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use watcher::{ChangeEvent, Engine, WatchOptions, Watcher};

use crate::ipc::{encode, DaemonStatus, IpcClient, Request, Response};
use crate::locks::DaemonLock;
use crate::session::Session;

/// State shared by every connection
struct Shared {
    engine: Engine,
    started: Instant,
    shutdown_tx: mpsc::Sender<()>,
}

/// Run the daemon in the current process until shutdown
pub async fn start(config: Config) -> Result<()> {
    let state_dir = config.daemon.state_dir();
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;

    let lock = DaemonLock::acquire(&state_dir)?;
    info!("Daemon starting (pid {})", std::process::id());

    let engine = Engine::new(config.watch.clone()).context("Failed to start watch engine")?;
    let startup = open_startup_watches(&engine, &config.daemon.watch);

    let socket_path = config.daemon.socket_path();
    if socket_path.exists() {
        // Left behind by a daemon that did not shut down cleanly; we hold the lock
        std::fs::remove_file(&socket_path).context("Failed to remove stale socket")?;
    }
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
    info!("Daemon listening on {}", socket_path.display());

    let result = serve(listener, engine).await;

    drop(startup);
    std::fs::remove_file(&socket_path).ok();
    lock.release()?;
    info!("Daemon stopped");
    result
}

/// Accept connections until a `shutdown` request or a termination signal
pub async fn serve(listener: UnixListener, engine: Engine) -> Result<()> {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let shared = Arc::new(Shared {
        engine,
        started: Instant::now(),
        shutdown_tx,
    });

    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let shared = shared.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, shared).await {
                                debug!("Connection ended with error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown requested");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = terminate.recv() => {
                info!("Terminated");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_connection(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Response>();

    // Single writer so listener callbacks never touch the socket directly
    let writer_task = tokio::spawn(async move {
        while let Some(response) = out_rx.recv().await {
            let line = encode(&response)?;
            writer.write_all(line.as_bytes()).await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    let mut session = Session::new(shared.engine.clone(), out_tx.clone());
    let mut lines = BufReader::new(reader).lines();
    let mut shutdown = false;
    debug!("Client connected");

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => request,
            Err(e) => {
                let _ = out_tx.send(Response::error(None, format!("Invalid request: {}", e)));
                continue;
            }
        };

        match request {
            Request::Status => {
                let _ = out_tx.send(Response::Status(status(&shared)));
            }
            Request::Shutdown => {
                let _ = out_tx.send(Response::Ok);
                shutdown = true;
                break;
            }
            other => session.handle(other),
        }
    }

    debug!(
        "Client disconnected, closing {} subscription(s)",
        session.subscription_count()
    );
    drop(session);
    drop(out_tx);
    let written = writer_task.await?;

    // Signal only once the reply has been flushed
    if shutdown {
        let _ = shared.shutdown_tx.send(()).await;
    }
    written
}

fn status(shared: &Shared) -> DaemonStatus {
    let engine = shared.engine.status();
    DaemonStatus {
        pid: std::process::id(),
        uptime_secs: shared.started.elapsed().as_secs(),
        nodes: engine.nodes,
        fswatchers: engine.fswatchers,
        watchers: engine.watchers,
        tree: engine.tree,
    }
}

/// Open the subscriptions listed in the config; their events go to the log
fn open_startup_watches(engine: &Engine, watches: &[StartupWatch]) -> Vec<Watcher> {
    let mut opened = Vec::new();
    for watch in watches {
        let options = WatchOptions {
            recursive: watch.recursive,
            depth: watch.depth,
        };
        let watcher = match Watcher::prepare(engine, &watch.path, options) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!("Cannot watch {}: {}", watch.path.display(), e);
                continue;
            }
        };
        watcher.on_change(|event: &ChangeEvent| {
            info!(action = %event.action, file = %event.file.display(), "change");
            Ok(())
        });
        match watcher.open() {
            Ok(()) => {
                info!("Watching {}", watcher.path().display());
                opened.push(watcher);
            }
            Err(e) => warn!("Cannot watch {}: {}", watch.path.display(), e),
        }
    }
    opened
}

/// Check if a daemon is answering on `socket_path`
pub fn is_running(socket_path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(socket_path).is_ok()
}

/// Ask the daemon to stop and wait for its socket to go away
pub async fn stop(socket_path: &Path) -> Result<()> {
    if !is_running(socket_path) {
        anyhow::bail!("Daemon is not running");
    }

    let mut client = IpcClient::connect(socket_path).await?;
    match client.request(&Request::Shutdown).await? {
        Response::Ok => {}
        other => anyhow::bail!("Unexpected response to shutdown: {:?}", other),
    }

    for _ in 0..50 {
        if !socket_path.exists() {
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    anyhow::bail!("Daemon did not stop within 5 seconds")
}
