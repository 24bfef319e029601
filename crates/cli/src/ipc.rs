//! IPC between the CLI and the daemon
//!
//! Newline-delimited JSON over a Unix socket. Every message is a single
//! object tagged with `type`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use ulid::Ulid;
use watcher::{Action, ChangeEvent};

/// Client → daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Subscribe {
        path: PathBuf,
        #[serde(default)]
        recursive: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        depth: Option<u32>,
    },
    Unsubscribe {
        id: Ulid,
    },
    Status,
    Shutdown,
}

/// Daemon → client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Subscribed {
        id: Ulid,
        path: PathBuf,
    },
    Event {
        id: Ulid,
        action: Action,
        filename: String,
        file: PathBuf,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Ulid>,
        message: String,
    },
    Unsubscribed {
        id: Ulid,
        destroyed: bool,
    },
    Status(DaemonStatus),
    Ok,
}

impl Response {
    pub fn event(id: Ulid, event: &ChangeEvent) -> Self {
        Response::Event {
            id,
            action: event.action,
            filename: event.filename.clone(),
            file: event.file.clone(),
        }
    }

    pub fn error(id: Option<Ulid>, message: impl Into<String>) -> Self {
        Response::Error {
            id,
            message: message.into(),
        }
    }
}

/// Daemon status payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub pid: u32,
    pub uptime_secs: u64,
    pub nodes: usize,
    pub fswatchers: usize,
    pub watchers: usize,
    pub tree: String,
}

/// Serialize one message as a line
pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message).context("Failed to encode message")?;
    line.push('\n');
    Ok(line)
}

/// IPC client for communicating with the daemon
pub struct IpcClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl IpcClient {
    /// Connect to the daemon socket
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    pub async fn send(&mut self, request: &Request) -> Result<()> {
        let line = encode(request)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next message from the daemon; `None` once the connection is closed
    pub async fn recv(&mut self) -> Result<Option<Response>> {
        while let Some(line) = self.lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let response = serde_json::from_str(trimmed)
                .with_context(|| format!("Invalid response from daemon: {}", trimmed))?;
            return Ok(Some(response));
        }
        Ok(None)
    }

    /// Send a request and wait for the next message
    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        self.send(request).await?;
        match self.recv().await? {
            Some(response) => Ok(response),
            None => anyhow::bail!("Daemon closed the connection"),
        }
    }

    /// Fetch daemon status
    pub async fn get_status(&mut self) -> Result<DaemonStatus> {
        match self.request(&Request::Status).await? {
            Response::Status(status) => Ok(status),
            Response::Error { message, .. } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }
}
