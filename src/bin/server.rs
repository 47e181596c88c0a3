use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use commander_session_server::constants::INBOUND_QUEUE_DEPTH;
use commander_session_server::directory::{
    DirectoryOptions, InMemoryDirectory, SessionDirectory,
};
use commander_session_server::local_store::LocalStore;
use commander_session_server::server_protocol::{
    parse_client_message, ParsedClientMessage, ServerMessage,
};
use commander_session_server::server_utils::{normalize_session_id, parse_queue_depth};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

const CLIENT_QUEUE_DEPTH: usize = 256;

type SharedState = Arc<ServerState>;

struct ClientContext {
    tx: mpsc::Sender<String>,
    subscriptions: HashMap<String, JoinHandle<()>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

struct ServerState {
    directory: InMemoryDirectory,
    clients: Mutex<HashMap<String, ClientContext>>,
}

impl ServerState {
    fn new(directory: InMemoryDirectory) -> Self {
        Self {
            directory,
            clients: Mutex::new(HashMap::new()),
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let data_dir = std::env::var("SESSION_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".data/sessions"));

    let options = DirectoryOptions {
        subscriber_queue: parse_queue_depth(
            std::env::var("PUBLISH_QUEUE").ok().as_deref(),
            INBOUND_QUEUE_DEPTH,
        ),
        ..DirectoryOptions::default()
    };
    info!(
        "[server] session documents in {} (subscriber queue {})",
        data_dir.display(),
        options.subscriber_queue
    );
    let directory = InMemoryDirectory::with_store(options, LocalStore::new(data_dir));
    let state = Arc::new(ServerState::new(directory));

    let app = router(state);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("[server] failed to bind {bind_addr}: {err}");
            std::process::exit(1);
        }
    };

    info!("[server] listening on :{port}");
    if let Err(err) = axum::serve(listener, app).await {
        error!("[server] runtime failed: {err}");
        std::process::exit(1);
    }
}

fn router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/sessions/{session_id}", get(session_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn session_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(session_id) = normalize_session_id(Some(&session_id)) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid session id" })));
    };
    match state.directory.document(&session_id).await {
        Some(snapshot) => (StatusCode::OK, Json(json!(snapshot))),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "no document" }))),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let client_id = make_id("client");
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE_DEPTH);
    register_client(&state, &client_id, tx).await;
    debug!("[server] {client_id} connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(&state, &client_id, raw.as_str()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(&state, &client_id, &text).await;
                } else {
                    send_to_client(
                        &state,
                        &client_id,
                        &ServerMessage::error("invalid utf8 message"),
                        QueuePolicy::DisconnectOnFull,
                    )
                    .await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    disconnect_client(&state, &client_id).await;
    let _ = writer.await;
    debug!("[server] {client_id} disconnected");
}

async fn register_client(state: &SharedState, client_id: &str, tx: mpsc::Sender<String>) {
    state.clients.lock().await.insert(
        client_id.to_string(),
        ClientContext {
            tx,
            subscriptions: HashMap::new(),
        },
    );
}

async fn handle_client_message(state: &SharedState, client_id: &str, raw: &str) {
    let Some(message) = parse_client_message(raw) else {
        send_to_client(
            state,
            client_id,
            &ServerMessage::error("invalid message"),
            QueuePolicy::DisconnectOnFull,
        )
        .await;
        return;
    };

    let reply = match message {
        ParsedClientMessage::CreateSession { participant_id } => {
            let session_id = state.directory.create_session(&participant_id).await;
            ServerMessage::SessionCreated { session_id }
        }
        ParsedClientMessage::JoinSession {
            session_id,
            participant_id,
        } => {
            let ok = state
                .directory
                .join_session(&session_id, &participant_id)
                .await;
            ServerMessage::JoinResult { session_id, ok }
        }
        ParsedClientMessage::Publish {
            session_id,
            snapshot,
        } => match state.directory.publish_snapshot(&session_id, snapshot).await {
            Ok(()) => ServerMessage::Published { session_id },
            Err(err) => {
                warn!("[server] publish from {client_id} dropped: {err}");
                ServerMessage::error(err.to_string())
            }
        },
        ParsedClientMessage::Subscribe { session_id } => {
            match subscribe_client(state, client_id, &session_id).await {
                Ok(()) => return,
                Err(message) => ServerMessage::error(message),
            }
        }
        ParsedClientMessage::Unsubscribe { session_id } => {
            unsubscribe_client(state, client_id, &session_id).await;
            return;
        }
        ParsedClientMessage::Ping { t } => ServerMessage::Pong { t },
    };

    send_to_client(state, client_id, &reply, QueuePolicy::DisconnectOnFull).await;
}

/// Confirms the subscription, then forwards every document the directory
/// delivers for `session_id`, so `subscribed` always precedes the first
/// `snapshot`. A second subscribe to the same session replaces the first.
async fn subscribe_client(
    state: &SharedState,
    client_id: &str,
    session_id: &str,
) -> Result<(), String> {
    let mut subscription = state
        .directory
        .subscribe(session_id)
        .await
        .map_err(|err| err.to_string())?;

    let mut clients = state.clients.lock().await;
    let Some(client) = clients.get_mut(client_id) else {
        return Err("client is gone".to_string());
    };
    let tx = client.tx.clone();
    let confirmed = ServerMessage::Subscribed {
        session_id: session_id.to_string(),
    };
    if tx.try_send(confirmed.to_json()).is_err() {
        drop(clients);
        warn!("[server] {client_id} cannot keep up; disconnecting");
        disconnect_client(state, client_id).await;
        return Ok(());
    }
    let forwarded_id = session_id.to_string();
    let label = client_id.to_string();
    let forwarder = tokio::spawn(async move {
        while let Some(snapshot) = subscription.next().await {
            let payload = ServerMessage::Snapshot {
                session_id: forwarded_id.clone(),
                snapshot,
            }
            .to_json();
            match tx.try_send(payload) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("[server] {label} queue full; dropped snapshot for {forwarded_id}");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    });
    if let Some(previous) = client
        .subscriptions
        .insert(session_id.to_string(), forwarder)
    {
        previous.abort();
    }
    Ok(())
}

async fn unsubscribe_client(state: &SharedState, client_id: &str, session_id: &str) {
    let mut clients = state.clients.lock().await;
    if let Some(handle) = clients
        .get_mut(client_id)
        .and_then(|client| client.subscriptions.remove(session_id))
    {
        handle.abort();
    }
}

async fn disconnect_client(state: &SharedState, client_id: &str) {
    let removed = state.clients.lock().await.remove(client_id);
    if let Some(context) = removed {
        for (_, handle) in context.subscriptions {
            handle.abort();
        }
    }
}

async fn send_to_client(
    state: &SharedState,
    client_id: &str,
    message: &ServerMessage,
    policy: QueuePolicy,
) {
    let send_failed = {
        let clients = state.clients.lock().await;
        match clients.get(client_id) {
            Some(client) => client.tx.try_send(message.to_json()).is_err(),
            None => false,
        }
    };
    if send_failed && policy == QueuePolicy::DisconnectOnFull {
        warn!("[server] {client_id} cannot keep up; disconnecting");
        disconnect_client(state, client_id).await;
    }
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}
