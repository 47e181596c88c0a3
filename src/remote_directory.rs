//! [`SessionDirectory`] over the `server` binary's WebSocket protocol.
//!
//! One connection carries requests and pushed snapshots. The server answers
//! each request once and in order, so replies go to a FIFO of waiting
//! callers; snapshots are routed by session id. A connection holds one
//! subscription per session, and subscribing again replaces it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::constants::INBOUND_QUEUE_DEPTH;
use crate::directory::{DirectoryError, SessionDirectory, Subscription};
use crate::server_protocol::{ParsedClientMessage, ServerMessage};
use crate::types::SessionSnapshot;

const OUTBOUND_QUEUE_DEPTH: usize = 256;

#[derive(Default)]
struct Routes {
    pending: VecDeque<oneshot::Sender<ServerMessage>>,
    subscriptions: HashMap<String, mpsc::Sender<SessionSnapshot>>,
    closed: bool,
}

pub struct RemoteDirectory {
    url: String,
    outbound: mpsc::Sender<String>,
    routes: Arc<Mutex<Routes>>,
    reader: JoinHandle<()>,
    subscriber_queue: usize,
}

impl RemoteDirectory {
    /// Connects to a `ws://host:port/ws` endpoint.
    pub async fn connect(url: &str) -> Result<Self, DirectoryError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|error| DirectoryError::Unavailable(format!("{url}: {error}")))?;
        let (mut sink, mut stream) = socket.split();

        let (outbound, mut queue) = mpsc::channel::<String>(OUTBOUND_QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(payload) = queue.recv().await {
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let routes = Arc::new(Mutex::new(Routes::default()));
        let reader = {
            let routes = routes.clone();
            let outbound = outbound.clone();
            let label = url.to_string();
            tokio::spawn(async move {
                while let Some(received) = stream.next().await {
                    let raw = match received {
                        Ok(Message::Text(raw)) => raw,
                        Ok(Message::Close(_)) | Err(_) => break,
                        Ok(_) => continue,
                    };
                    match serde_json::from_str::<ServerMessage>(raw.as_str()) {
                        Ok(message) => route(&routes, &outbound, message).await,
                        Err(error) => warn!("[remote] unreadable message from {label}: {error}"),
                    }
                }
                let mut routes = routes.lock().await;
                routes.closed = true;
                routes.pending.clear();
                routes.subscriptions.clear();
                info!("[remote] connection to {label} closed");
            })
        };

        info!("[remote] connected to {url}");
        Ok(Self {
            url: url.to_string(),
            outbound,
            routes,
            reader,
            subscriber_queue: INBOUND_QUEUE_DEPTH,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, message: ParsedClientMessage) -> Result<ServerMessage, DirectoryError> {
        self.request_with(message, |_| {}).await
    }

    /// Sends `message` and waits for its reply. `register` runs under the
    /// same lock that queues the request, ahead of anything the reply can
    /// trigger.
    async fn request_with(
        &self,
        message: ParsedClientMessage,
        register: impl FnOnce(&mut Routes),
    ) -> Result<ServerMessage, DirectoryError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut routes = self.routes.lock().await;
            if routes.closed {
                return Err(self.closed());
            }
            register(&mut routes);
            routes.pending.push_back(reply_tx);
            if self.outbound.send(message.to_json()).await.is_err() {
                routes.pending.pop_back();
                return Err(self.closed());
            }
        }
        reply_rx.await.map_err(|_| self.closed())
    }

    fn closed(&self) -> DirectoryError {
        DirectoryError::Unavailable(format!("connection to {} closed", self.url))
    }
}

impl Drop for RemoteDirectory {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn route(routes: &Mutex<Routes>, outbound: &mpsc::Sender<String>, message: ServerMessage) {
    let mut routes = routes.lock().await;
    match message {
        ServerMessage::Snapshot {
            session_id,
            snapshot,
        } => {
            let Some(tx) = routes.subscriptions.get(&session_id) else {
                debug!("[remote] snapshot for unsubscribed session {session_id}");
                return;
            };
            match tx.try_send(snapshot) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("[remote] subscriber for {session_id} is full; dropped snapshot");
                }
                Err(TrySendError::Closed(_)) => {
                    routes.subscriptions.remove(&session_id);
                    let _ = outbound.try_send(ParsedClientMessage::Unsubscribe { session_id }.to_json());
                }
            }
        }
        reply => match routes.pending.pop_front() {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => debug!("[remote] unsolicited reply {reply:?}"),
        },
    }
}

#[async_trait]
impl SessionDirectory for RemoteDirectory {
    async fn create_session(&self, initiator_id: &str) -> Option<String> {
        let request = ParsedClientMessage::CreateSession {
            participant_id: initiator_id.to_string(),
        };
        match self.request(request).await {
            Ok(ServerMessage::SessionCreated { session_id }) => session_id,
            Ok(other) => {
                warn!("[remote] create_session answered with {other:?}");
                None
            }
            Err(error) => {
                warn!("[remote] create_session failed: {error}");
                None
            }
        }
    }

    async fn join_session(&self, session_id: &str, participant_id: &str) -> bool {
        let request = ParsedClientMessage::JoinSession {
            session_id: session_id.to_string(),
            participant_id: participant_id.to_string(),
        };
        match self.request(request).await {
            Ok(ServerMessage::JoinResult { ok, .. }) => ok,
            Ok(other) => {
                warn!("[remote] join_session answered with {other:?}");
                false
            }
            Err(error) => {
                warn!("[remote] join_session failed: {error}");
                false
            }
        }
    }

    async fn publish_snapshot(
        &self,
        session_id: &str,
        snapshot: SessionSnapshot,
    ) -> Result<(), DirectoryError> {
        let request = ParsedClientMessage::Publish {
            session_id: session_id.to_string(),
            snapshot,
        };
        match self.request(request).await? {
            ServerMessage::Published { .. } => Ok(()),
            ServerMessage::Error { message } => Err(DirectoryError::Rejected(message)),
            other => Err(DirectoryError::Unavailable(format!(
                "publish answered with {other:?}"
            ))),
        }
    }

    async fn subscribe(&self, session_id: &str) -> Result<Subscription, DirectoryError> {
        let (tx, rx) = mpsc::channel(self.subscriber_queue);
        let request = ParsedClientMessage::Subscribe {
            session_id: session_id.to_string(),
        };
        let key = session_id.to_string();
        let reply = self
            .request_with(request, |routes| {
                routes.subscriptions.insert(key, tx);
            })
            .await?;
        match reply {
            ServerMessage::Subscribed { .. } => Ok(Subscription::new(rx)),
            other => {
                self.routes.lock().await.subscriptions.remove(session_id);
                match other {
                    ServerMessage::Error { message } => Err(DirectoryError::Rejected(message)),
                    other => Err(DirectoryError::Unavailable(format!(
                        "subscribe answered with {other:?}"
                    ))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_protocol::parse_client_message;

    fn snapshot_for(session_id: &str, ended: bool) -> ServerMessage {
        ServerMessage::Snapshot {
            session_id: session_id.to_string(),
            snapshot: SessionSnapshot {
                game_ended: ended,
                ..SessionSnapshot::default()
            },
        }
    }

    #[tokio::test]
    async fn replies_go_to_waiters_in_request_order() {
        let routes = Mutex::new(Routes::default());
        let (outbound, _queue) = mpsc::channel(4);
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        {
            let mut guard = routes.lock().await;
            guard.pending.push_back(first_tx);
            guard.pending.push_back(second_tx);
        }

        let published = ServerMessage::Published {
            session_id: "Ab12Cd34Ef".to_string(),
        };
        route(&routes, &outbound, published.clone()).await;
        route(&routes, &outbound, ServerMessage::error("nope")).await;

        assert_eq!(first_rx.await.expect("first reply"), published);
        assert_eq!(second_rx.await.expect("second reply"), ServerMessage::error("nope"));
        assert!(routes.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn snapshots_skip_the_reply_queue() {
        let routes = Mutex::new(Routes::default());
        let (outbound, _queue) = mpsc::channel(4);
        let (sub_tx, mut sub_rx) = mpsc::channel(4);
        let (reply_tx, mut reply_rx) = oneshot::channel();
        {
            let mut guard = routes.lock().await;
            guard.subscriptions.insert("Ab12Cd34Ef".to_string(), sub_tx);
            guard.pending.push_back(reply_tx);
        }

        route(&routes, &outbound, snapshot_for("Ab12Cd34Ef", true)).await;
        route(&routes, &outbound, snapshot_for("Zz99Zz99Zz", false)).await;

        assert!(sub_rx.try_recv().expect("routed snapshot").game_ended);
        assert!(sub_rx.try_recv().is_err());
        assert!(reply_rx.try_recv().is_err());
        assert_eq!(routes.lock().await.pending.len(), 1);
    }

    #[tokio::test]
    async fn dropped_subscription_is_unsubscribed_upstream() {
        let routes = Mutex::new(Routes::default());
        let (outbound, mut queue) = mpsc::channel(4);
        let (sub_tx, sub_rx) = mpsc::channel(4);
        routes
            .lock()
            .await
            .subscriptions
            .insert("Ab12Cd34Ef".to_string(), sub_tx);
        drop(Subscription::new(sub_rx));

        route(&routes, &outbound, snapshot_for("Ab12Cd34Ef", false)).await;

        assert!(routes.lock().await.subscriptions.is_empty());
        let sent = queue.try_recv().expect("unsubscribe queued");
        assert!(matches!(
            parse_client_message(&sent),
            Some(ParsedClientMessage::Unsubscribe { session_id }) if session_id == "Ab12Cd34Ef"
        ));
    }

    #[tokio::test]
    async fn connect_to_nothing_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let connected = RemoteDirectory::connect(&format!("ws://{addr}/ws")).await;
        assert!(matches!(connected, Err(DirectoryError::Unavailable(_))));
    }
}
