//! Per-connection subscription state
//!
//! Each `subscribe` request becomes one [`Watcher`] owned by the session.
//! Events are pushed into the connection's outgoing queue from the engine's
//! dispatcher thread; dropping the session closes every watcher it opened.

use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use ulid::Ulid;
use watcher::{ChangeEvent, Engine, WatchOptions, Watcher};

use crate::ipc::{Request, Response};

pub struct Session {
    engine: Engine,
    out: UnboundedSender<Response>,
    subscriptions: HashMap<Ulid, Watcher>,
}

impl Session {
    pub fn new(engine: Engine, out: UnboundedSender<Response>) -> Self {
        Self {
            engine,
            out,
            subscriptions: HashMap::new(),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Handle one request, queueing its responses
    ///
    /// `status` and `shutdown` are answered by the daemon itself.
    pub fn handle(&mut self, request: Request) {
        match request {
            Request::Subscribe {
                path,
                recursive,
                depth,
            } => match Watcher::prepare(&self.engine, &path, WatchOptions { recursive, depth }) {
                Ok(watcher) => self.subscribe(watcher),
                Err(e) => self.reply(Response::error(None, e.to_string())),
            },
            Request::Unsubscribe { id } => {
                let response = match self.subscriptions.remove(&id) {
                    Some(watcher) => {
                        let destroyed = watcher.close();
                        info!("Closed subscription {} on {}", id, watcher.path().display());
                        Response::Unsubscribed { id, destroyed }
                    }
                    None => Response::error(Some(id), "Unknown subscription"),
                };
                self.reply(response);
            }
            other @ (Request::Status | Request::Shutdown) => {
                debug!("Request answered outside the session: {:?}", other);
            }
        }
    }

    fn subscribe(&mut self, watcher: Watcher) {
        let id = Ulid::new();

        // Listeners go in after the ack and before the handle joins the tree
        self.reply(Response::Subscribed {
            id,
            path: watcher.path().to_path_buf(),
        });

        let out = self.out.clone();
        watcher.on_change(move |event: &ChangeEvent| {
            out.send(Response::event(id, event))
                .map_err(|_| anyhow::anyhow!("client disconnected"))
        });
        let out = self.out.clone();
        watcher.on_error(move |error, _event| {
            let _ = out.send(Response::error(Some(id), error.to_string()));
        });

        if let Err(e) = watcher.open() {
            self.reply(Response::error(Some(id), e.to_string()));
            return;
        }
        info!(
            "Opened subscription {} on {} ({:?})",
            id,
            watcher.path().display(),
            watcher.recursion()
        );

        self.subscriptions.insert(id, watcher);
    }

    fn reply(&self, response: Response) {
        // Receiver gone means the connection is closing
        let _ = self.out.send(response);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for (id, watcher) in self.subscriptions.drain() {
            watcher.close();
            debug!("Closed subscription {} with its connection", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osb_core::WatchConfig;
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use watcher::notify::event::CreateKind;
    use watcher::notify::{Event, EventKind};
    use watcher::{Action, NullBackend};

    fn manual_engine() -> Engine {
        Engine::with_backend(WatchConfig::default(), Box::new(NullBackend))
    }

    #[tokio::test]
    async fn test_subscribe_then_events() {
        let temp_dir = TempDir::new().unwrap();
        let dir = fs::canonicalize(temp_dir.path()).unwrap();
        let engine = manual_engine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = Session::new(engine.clone(), tx);

        session.handle(Request::Subscribe {
            path: dir.clone(),
            recursive: false,
            depth: None,
        });
        let id = match rx.recv().await.unwrap() {
            Response::Subscribed { id, path } => {
                assert_eq!(path, dir);
                id
            }
            other => panic!("unexpected {:?}", other),
        };

        let file = dir.join("new.txt");
        fs::write(&file, b"").unwrap();
        engine.process_event(Event::new(EventKind::Create(CreateKind::File)).add_path(file.clone()));

        assert_eq!(
            rx.recv().await.unwrap(),
            Response::Event {
                id,
                action: Action::Add,
                filename: "new.txt".to_string(),
                file,
            }
        );

        session.handle(Request::Unsubscribe { id });
        assert_eq!(
            rx.recv().await.unwrap(),
            Response::Unsubscribed {
                id,
                destroyed: true
            }
        );
        assert_eq!(session.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_errors_are_reported() {
        let engine = manual_engine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = Session::new(engine, tx);

        session.handle(Request::Subscribe {
            path: "/".into(),
            recursive: true,
            depth: None,
        });
        assert!(matches!(
            rx.recv().await.unwrap(),
            Response::Error { id: None, message } if message.contains("root")
        ));
        // One reply per failed subscribe, and nothing attached
        assert!(rx.try_recv().is_err());
        assert_eq!(session.subscription_count(), 0);

        let unknown = Ulid::new();
        session.handle(Request::Unsubscribe { id: unknown });
        assert_eq!(
            rx.recv().await.unwrap(),
            Response::error(Some(unknown), "Unknown subscription")
        );
    }

    #[tokio::test]
    async fn test_dropping_session_closes_watchers() {
        let temp_dir = TempDir::new().unwrap();
        let engine = manual_engine();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = Session::new(engine.clone(), tx);

        session.handle(Request::Subscribe {
            path: temp_dir.path().to_path_buf(),
            recursive: true,
            depth: Some(2),
        });
        assert_eq!(engine.status().watchers, 1);

        drop(session);
        assert_eq!(engine.status().watchers, 0);
        assert_eq!(engine.status().nodes, 0);
    }
}
