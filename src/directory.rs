//! Session directory: an opaque shared document store keyed by session id.
//!
//! The store keeps one full snapshot per session and fans every publish out
//! to all live subscriptions, the publisher's own included. Delivery order is
//! publish order; nothing is merged.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use log::{debug, info, warn};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

use crate::constants::{INBOUND_QUEUE_DEPTH, MAX_PLAYERS, SESSION_ID_LEN};
use crate::local_store::LocalStore;
use crate::types::SessionSnapshot;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("session directory unavailable: {0}")]
    Unavailable(String),
    #[error("snapshot rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait SessionDirectory: Send + Sync + 'static {
    /// Opens a new session with `initiator_id` as its first participant.
    async fn create_session(&self, initiator_id: &str) -> Option<String>;

    async fn join_session(&self, session_id: &str, participant_id: &str) -> bool;

    /// Replaces the session document. Best-effort: callers log and move on.
    async fn publish_snapshot(
        &self,
        session_id: &str,
        snapshot: SessionSnapshot,
    ) -> Result<(), DirectoryError>;

    async fn subscribe(&self, session_id: &str) -> Result<Subscription, DirectoryError>;
}

/// Inbound half of a subscription. Dropping it unsubscribes; the directory
/// prunes the closed sender on its next publish.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<SessionSnapshot>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<SessionSnapshot>) -> Self {
        Self { receiver }
    }

    pub async fn next(&mut self) -> Option<SessionSnapshot> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<SessionSnapshot> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.receiver.close();
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DirectoryOptions {
    pub subscriber_queue: usize,
    pub max_players: usize,
}

impl Default for DirectoryOptions {
    fn default() -> Self {
        Self {
            subscriber_queue: INBOUND_QUEUE_DEPTH,
            max_players: MAX_PLAYERS,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    participants: Vec<String>,
    #[serde(default)]
    snapshot: Option<SessionSnapshot>,
}

#[derive(Default)]
struct SessionRecord {
    participants: HashSet<String>,
    snapshot: Option<SessionSnapshot>,
    subscribers: Vec<mpsc::Sender<SessionSnapshot>>,
    publish_count: u64,
}

impl SessionRecord {
    fn to_stored(&self) -> StoredSession {
        let mut participants: Vec<String> = self.participants.iter().cloned().collect();
        participants.sort();
        StoredSession {
            participants,
            snapshot: self.snapshot.clone(),
        }
    }
}

pub struct InMemoryDirectory {
    options: DirectoryOptions,
    sessions: Mutex<HashMap<String, SessionRecord>>,
    store: Option<LocalStore>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new(DirectoryOptions::default())
    }
}

impl InMemoryDirectory {
    pub fn new(options: DirectoryOptions) -> Self {
        Self {
            options,
            sessions: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// Backs every session document with `store`, reloading whatever is
    /// already there.
    pub fn with_store(options: DirectoryOptions, store: LocalStore) -> Self {
        let mut sessions = HashMap::new();
        for key in store.keys() {
            let Some(stored) = store.load::<StoredSession>(&key) else {
                continue;
            };
            sessions.insert(
                key,
                SessionRecord {
                    participants: stored.participants.into_iter().collect(),
                    snapshot: stored.snapshot,
                    ..SessionRecord::default()
                },
            );
        }
        if !sessions.is_empty() {
            info!(
                "[directory] restored {} session(s) from {}",
                sessions.len(),
                store.dir().display()
            );
        }
        Self {
            options,
            sessions: Mutex::new(sessions),
            store: Some(store),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn document(&self, session_id: &str) -> Option<SessionSnapshot> {
        let guard = self.sessions.lock().await;
        guard.get(session_id).and_then(|record| record.snapshot.clone())
    }

    pub async fn publish_count(&self, session_id: &str) -> u64 {
        let guard = self.sessions.lock().await;
        guard.get(session_id).map_or(0, |record| record.publish_count)
    }

    pub async fn subscriber_count(&self, session_id: &str) -> usize {
        let guard = self.sessions.lock().await;
        guard
            .get(session_id)
            .map_or(0, |record| record.subscribers.iter().filter(|tx| !tx.is_closed()).count())
    }

    fn persist(&self, session_id: &str, record: &SessionRecord) {
        if let Some(store) = &self.store {
            store.save(session_id, &record.to_stored());
        }
    }
}

#[async_trait]
impl SessionDirectory for InMemoryDirectory {
    async fn create_session(&self, initiator_id: &str) -> Option<String> {
        let initiator = initiator_id.trim();
        if initiator.is_empty() {
            return None;
        }
        let mut guard = self.sessions.lock().await;
        let session_id = loop {
            let candidate = make_session_id();
            if !guard.contains_key(&candidate) {
                break candidate;
            }
        };
        let mut record = SessionRecord::default();
        record.participants.insert(initiator.to_string());
        self.persist(&session_id, &record);
        guard.insert(session_id.clone(), record);
        info!("[directory] session {session_id} created by {initiator}");
        Some(session_id)
    }

    async fn join_session(&self, session_id: &str, participant_id: &str) -> bool {
        let participant = participant_id.trim();
        if participant.is_empty() {
            return false;
        }
        let mut guard = self.sessions.lock().await;
        let Some(record) = guard.get_mut(session_id) else {
            warn!("[directory] join rejected: session {session_id} not found");
            return false;
        };
        if record.participants.insert(participant.to_string()) {
            self.persist(session_id, record);
            info!("[directory] {participant} joined session {session_id}");
        }
        true
    }

    async fn publish_snapshot(
        &self,
        session_id: &str,
        snapshot: SessionSnapshot,
    ) -> Result<(), DirectoryError> {
        if snapshot.players.len() > self.options.max_players {
            return Err(DirectoryError::Rejected(format!(
                "{} players exceed the {}-seat roster",
                snapshot.players.len(),
                self.options.max_players
            )));
        }
        let mut guard = self.sessions.lock().await;
        let record = guard
            .get_mut(session_id)
            .ok_or_else(|| DirectoryError::SessionNotFound(session_id.to_string()))?;

        record.subscribers.retain(|tx| match tx.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("[directory] subscriber queue full on {session_id}; dropped one snapshot");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        record.snapshot = Some(snapshot);
        record.publish_count += 1;
        self.persist(session_id, record);
        debug!(
            "[directory] publish #{} on {session_id} to {} subscriber(s)",
            record.publish_count,
            record.subscribers.len()
        );
        Ok(())
    }

    async fn subscribe(&self, session_id: &str) -> Result<Subscription, DirectoryError> {
        let mut guard = self.sessions.lock().await;
        let record = guard
            .get_mut(session_id)
            .ok_or_else(|| DirectoryError::SessionNotFound(session_id.to_string()))?;
        let (tx, rx) = mpsc::channel(self.options.subscriber_queue.max(1));
        if let Some(current) = record.snapshot.clone() {
            let _ = tx.try_send(current);
        }
        record.subscribers.retain(|existing| !existing.is_closed());
        record.subscribers.push(tx);
        Ok(Subscription::new(rx))
    }
}

pub fn make_session_id() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::tests::temp_dir;
    use crate::session::Session;
    use crate::server_utils::normalize_session_id;
    use crate::types::VitalsDelta;

    fn snapshot_with(players: usize) -> SessionSnapshot {
        let mut session = Session::default();
        for _ in 0..players {
            session.add_player();
        }
        session.snapshot()
    }

    #[test]
    fn session_ids_are_well_formed() {
        let id = make_session_id();
        assert_eq!(normalize_session_id(Some(&id)), Some(id.clone()));
    }

    #[tokio::test]
    async fn create_and_join() {
        let directory = InMemoryDirectory::default();
        assert!(directory.create_session("   ").await.is_none());
        let id = directory.create_session("host").await.expect("session id");
        assert!(directory.join_session(&id, "guest").await);
        assert!(!directory.join_session("missing", "guest").await);
        assert!(!directory.join_session(&id, " ").await);
        assert_eq!(directory.session_count().await, 1);
    }

    #[tokio::test]
    async fn publish_fans_out_to_every_subscriber() {
        let directory = InMemoryDirectory::default();
        let id = directory.create_session("host").await.expect("session id");
        let mut first = directory.subscribe(&id).await.expect("subscribe");
        let mut second = directory.subscribe(&id).await.expect("subscribe");

        let snapshot = snapshot_with(2);
        directory
            .publish_snapshot(&id, snapshot.clone())
            .await
            .expect("publish");

        assert_eq!(first.next().await, Some(snapshot.clone()));
        assert_eq!(second.next().await, Some(snapshot.clone()));
        assert_eq!(directory.document(&id).await, Some(snapshot));
        assert_eq!(directory.publish_count(&id).await, 1);
    }

    #[tokio::test]
    async fn subscribe_delivers_current_document_first() {
        let directory = InMemoryDirectory::default();
        let id = directory.create_session("host").await.expect("session id");
        let snapshot = snapshot_with(3);
        directory
            .publish_snapshot(&id, snapshot.clone())
            .await
            .expect("publish");

        let mut late = directory.subscribe(&id).await.expect("subscribe");
        assert_eq!(late.try_next(), Some(snapshot));
        assert_eq!(late.try_next(), None);
    }

    #[tokio::test]
    async fn unknown_session_and_oversized_roster_are_errors() {
        let directory = InMemoryDirectory::default();
        assert_eq!(
            directory.publish_snapshot("nope", snapshot_with(1)).await,
            Err(DirectoryError::SessionNotFound("nope".to_string()))
        );
        assert!(matches!(
            directory.subscribe("nope").await,
            Err(DirectoryError::SessionNotFound(_))
        ));

        let id = directory.create_session("host").await.expect("session id");
        let mut oversized = snapshot_with(4);
        oversized.players.push(oversized.players[0].clone());
        assert!(matches!(
            directory.publish_snapshot(&id, oversized).await,
            Err(DirectoryError::Rejected(_))
        ));
        assert_eq!(directory.publish_count(&id).await, 0);
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let directory = InMemoryDirectory::default();
        let id = directory.create_session("host").await.expect("session id");
        let kept = directory.subscribe(&id).await.expect("subscribe");
        let gone = directory.subscribe(&id).await.expect("subscribe");
        gone.unsubscribe();
        assert_eq!(directory.subscriber_count(&id).await, 1);

        directory
            .publish_snapshot(&id, snapshot_with(1))
            .await
            .expect("publish");
        drop(kept);
        assert_eq!(directory.subscriber_count(&id).await, 0);
    }

    #[tokio::test]
    async fn full_subscriber_queue_drops_instead_of_blocking() {
        let directory = InMemoryDirectory::new(DirectoryOptions {
            subscriber_queue: 1,
            ..DirectoryOptions::default()
        });
        let id = directory.create_session("host").await.expect("session id");
        let mut slow = directory.subscribe(&id).await.expect("subscribe");

        let first = snapshot_with(1);
        let second = snapshot_with(2);
        directory.publish_snapshot(&id, first.clone()).await.expect("publish");
        directory.publish_snapshot(&id, second.clone()).await.expect("publish");

        assert_eq!(slow.try_next(), Some(first));
        assert_eq!(slow.try_next(), None);
        assert_eq!(directory.document(&id).await, Some(second));
    }

    #[tokio::test]
    async fn documents_survive_restart_with_store() {
        let dir = temp_dir("directory-store");
        let id = {
            let directory =
                InMemoryDirectory::with_store(DirectoryOptions::default(), LocalStore::new(&dir));
            let id = directory.create_session("host").await.expect("session id");
            let mut session = Session::default();
            let player = session.add_player().expect("seat");
            session.apply_vitals_delta(player, VitalsDelta::Life(-3));
            directory
                .publish_snapshot(&id, session.snapshot())
                .await
                .expect("publish");
            id
        };
        let restored =
            InMemoryDirectory::with_store(DirectoryOptions::default(), LocalStore::new(&dir));
        let document = restored.document(&id).await.expect("document restored");
        assert_eq!(document.players[0].life, 37);
        assert!(restored.join_session(&id, "guest").await);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
