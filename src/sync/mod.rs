//! Synchronization engine: keeps one local [`Session`] in step with a shared
//! session document.
//!
//! Local mutations go through the engine, which schedules a coalesced publish
//! of the full snapshot. Inbound snapshots replace roster, history and the end
//! flag wholesale. Concurrent writers race and the last publish the directory
//! delivers wins for every subscriber, including the loser's own view.
//!
//! The engine also owns the table's preset book and game clock, since both
//! write into the shared document.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::constants::{GAME_STATE_KEY, PUBLISH_WINDOW_MS};
use crate::directory::{DirectoryError, SessionDirectory, Subscription};
use crate::event_log::messages;
use crate::local_store::LocalStore;
use crate::presets::PresetBook;
use crate::session::Session;
use crate::timer::GameTimer;
use crate::types::{Player, PlayerId, SessionSnapshot, VitalsDelta};

pub mod debounce;

use debounce::Debouncer;

pub type SharedSession = Arc<Mutex<Session>>;

/// What happens to a publish still inside its window when the engine
/// disconnects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Teardown {
    #[default]
    Flush,
    Discard,
}

#[derive(Clone, Copy, Debug)]
pub struct SyncOptions {
    pub publish_window: Duration,
    pub teardown: Teardown,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            publish_window: Duration::from_millis(PUBLISH_WINDOW_MS),
            teardown: Teardown::default(),
        }
    }
}

/// Where a committed snapshot goes: the coalesced publish and, with a local
/// store, the `gameState` blob.
#[derive(Clone)]
struct Outbound {
    publisher: Arc<Debouncer<SessionSnapshot>>,
    persister: Option<Arc<Debouncer<SessionSnapshot>>>,
}

impl Outbound {
    fn commit(&self, session: &Session) {
        let snapshot = session.snapshot();
        if let Some(persister) = &self.persister {
            persister.schedule(snapshot.clone());
        }
        self.publisher.schedule(snapshot);
    }
}

pub struct SyncEngine<D: SessionDirectory> {
    session_id: String,
    directory: Arc<D>,
    session: SharedSession,
    options: SyncOptions,
    outbound: Outbound,
    store: Option<LocalStore>,
    presets: StdMutex<PresetBook>,
    timer: GameTimer,
    inbound: Option<JoinHandle<()>>,
}

impl<D: SessionDirectory> SyncEngine<D> {
    /// Creates a session and seeds it with the local state.
    pub async fn host(
        directory: Arc<D>,
        initiator_id: &str,
        session: Session,
        options: SyncOptions,
        store: Option<LocalStore>,
    ) -> Result<Self, DirectoryError> {
        let session_id = directory
            .create_session(initiator_id)
            .await
            .ok_or_else(|| DirectoryError::Unavailable("no session id returned".to_string()))?;
        let engine = Self::connect(directory, &session_id, session, options, store).await?;
        let snapshot = engine.snapshot().await;
        engine.outbound.publisher.schedule(snapshot);
        engine.outbound.publisher.flush().await;
        info!("[sync] hosting session {session_id}");
        Ok(engine)
    }

    /// Joins an existing session. The directory's current document, when
    /// there is one, replaces the local state as soon as it arrives.
    pub async fn join(
        directory: Arc<D>,
        session_id: &str,
        participant_id: &str,
        session: Session,
        options: SyncOptions,
        store: Option<LocalStore>,
    ) -> Result<Self, DirectoryError> {
        if !directory.join_session(session_id, participant_id).await {
            return Err(DirectoryError::Rejected(format!(
                "join of session {session_id} refused"
            )));
        }
        let engine = Self::connect(directory, session_id, session, options, store).await?;
        info!("[sync] {participant_id} joined session {session_id}");
        Ok(engine)
    }

    pub async fn connect(
        directory: Arc<D>,
        session_id: &str,
        session: Session,
        options: SyncOptions,
        store: Option<LocalStore>,
    ) -> Result<Self, DirectoryError> {
        let subscription = directory.subscribe(session_id).await?;
        let session = Arc::new(Mutex::new(session));
        let persister = store
            .clone()
            .map(|store| Arc::new(game_state_persister(store)));
        let presets = store.as_ref().map(PresetBook::load).unwrap_or_default();

        let publisher = {
            let directory = directory.clone();
            let session_id = session_id.to_string();
            Debouncer::new(options.publish_window, move |snapshot: SessionSnapshot| {
                let directory = directory.clone();
                let session_id = session_id.clone();
                async move {
                    if let Err(error) = directory.publish_snapshot(&session_id, snapshot).await {
                        warn!("[sync] publish to {session_id} dropped: {error}");
                    }
                }
            })
        };

        let mut engine = Self {
            session_id: session_id.to_string(),
            directory,
            session,
            options,
            outbound: Outbound {
                publisher: Arc::new(publisher),
                persister,
            },
            store,
            presets: StdMutex::new(presets),
            timer: GameTimer::default(),
            inbound: None,
        };
        engine.inbound = Some(engine.spawn_inbound(subscription));
        Ok(engine)
    }

    fn spawn_inbound(&self, mut subscription: Subscription) -> JoinHandle<()> {
        let session = self.session.clone();
        let session_id = self.session_id.clone();
        let persister = self.outbound.persister.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = subscription.next().await {
                let mut guard = session.lock().await;
                if !guard.apply_remote(snapshot) {
                    continue;
                }
                debug!(
                    "[sync] inbound snapshot applied on {session_id} ({} players)",
                    guard.players().len()
                );
                if let Some(persister) = &persister {
                    persister.schedule(guard.snapshot());
                }
            }
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    pub fn options(&self) -> SyncOptions {
        self.options
    }

    pub fn session(&self) -> SharedSession {
        self.session.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().await.snapshot()
    }

    pub fn is_publish_pending(&self) -> bool {
        self.outbound.publisher.is_pending()
    }

    pub fn timer(&self) -> &GameTimer {
        &self.timer
    }

    pub fn presets(&self) -> PresetBook {
        lock_presets(&self.presets).clone()
    }

    pub async fn add_player(&self) -> Option<PlayerId> {
        let mut session = self.session.lock().await;
        let added = session.add_player();
        if added.is_some() {
            self.outbound.commit(&session);
        }
        added
    }

    pub async fn remove_player(&self, id: PlayerId) -> bool {
        self.mutate(|session| session.remove_player(id)).await
    }

    pub async fn apply_vitals_delta(&self, id: PlayerId, delta: VitalsDelta) -> bool {
        self.mutate(|session| session.apply_vitals_delta(id, delta)).await
    }

    pub async fn update_player(&self, player: Player) -> bool {
        self.mutate(|session| session.update_player(player)).await
    }

    pub async fn rename_player(&self, id: PlayerId, name: &str) -> bool {
        self.mutate(|session| session.rename_player(id, name)).await
    }

    pub async fn set_icon(&self, id: PlayerId, icon: &str) -> bool {
        self.mutate(|session| session.set_icon(id, icon)).await
    }

    /// Starts a fresh game. The current preset drops its saved game.
    pub async fn reset_game(&self) {
        let mut session = self.session.lock().await;
        session.reset_game();
        self.update_presets(|book| book.clear_game_state(session.players()));
        self.outbound.commit(&session);
    }

    /// Loads a preset from the book and makes it current.
    pub async fn load_preset(&self, id: &str) -> bool {
        let selected = lock_presets(&self.presets).select(id).cloned();
        let Some(preset) = selected else {
            return false;
        };
        self.mutate(|session| {
            session.load_preset(&preset);
            true
        })
        .await
    }

    /// Saves the seated roster as a new preset with fresh vitals.
    pub async fn create_preset(&self, name: &str) -> Option<String> {
        let players = self.session.lock().await.players().to_vec();
        self.update_presets(|book| book.create(name, &players))
    }

    pub fn rename_preset(&self, id: &str, name: &str) -> bool {
        self.update_presets(|book| book.rename(id, name))
    }

    pub fn delete_preset(&self, id: &str) -> bool {
        self.update_presets(|book| book.delete(id))
    }

    /// Embeds the running game into the current preset, creating one when
    /// none is current, and logs the save to the table.
    pub async fn save_game_state(&self) -> String {
        let mut session = self.session.lock().await;
        let (id, created) = {
            let mut book = lock_presets(&self.presets);
            let saved = book.save_game_state(&session.snapshot());
            if let Some(store) = &self.store {
                book.save(store);
            }
            saved
        };
        if created {
            session.log_event(&messages::game_state_saved_as_new_preset());
        } else {
            session.log_event(&messages::game_state_saved());
        }
        self.outbound.commit(&session);
        id
    }

    /// Runs the game clock. When it runs out, `Time's up!` is logged and
    /// published like any other mutation.
    pub fn start_timer(&self) -> bool {
        let session = self.session.clone();
        let outbound = self.outbound.clone();
        let session_id = self.session_id.clone();
        self.timer.start(move || async move {
            let mut session = session.lock().await;
            session.time_up();
            outbound.commit(&session);
            info!("[sync] game clock ran out on {session_id}");
        })
    }

    async fn mutate(&self, op: impl FnOnce(&mut Session) -> bool) -> bool {
        let mut session = self.session.lock().await;
        let was_ended = session.is_game_ended();
        let changed = op(&mut *session);
        if changed {
            if !was_ended && session.is_game_ended() {
                // the crowned roster goes back to the current preset
                self.update_presets(|book| book.clear_game_state(session.players()));
            }
            self.outbound.commit(&session);
        }
        changed
    }

    /// Runs `op` on the preset book and persists it when `op` reports a
    /// change.
    fn update_presets<R: Persisted>(&self, op: impl FnOnce(&mut PresetBook) -> R) -> R {
        let mut book = lock_presets(&self.presets);
        let result = op(&mut book);
        if result.changed() {
            if let Some(store) = &self.store {
                book.save(store);
            }
        }
        result
    }

    /// Publishes anything still inside the window right away.
    pub async fn flush(&self) -> bool {
        self.outbound.publisher.flush().await
    }

    pub async fn disconnect(self) {
        let teardown = self.options.teardown;
        self.disconnect_with(teardown).await;
    }

    /// Unsubscribes, then settles the outbound side per `teardown`. Once this
    /// returns nothing more is published or applied.
    pub async fn disconnect_with(mut self, teardown: Teardown) {
        if let Some(inbound) = self.inbound.take() {
            inbound.abort();
            let _ = inbound.await;
        }
        self.timer.cancel();
        let publisher = &self.outbound.publisher;
        match teardown {
            Teardown::Flush => {
                if publisher.flush().await {
                    debug!("[sync] flushed pending publish on {}", self.session_id);
                }
            }
            Teardown::Discard => {
                if publisher.cancel() {
                    info!("[sync] discarded pending publish on {}", self.session_id);
                }
                publisher.idle().await;
            }
        }
        if let Some(persister) = &self.outbound.persister {
            persister.flush().await;
        }
        info!("[sync] left session {}", self.session_id);
    }
}

impl<D: SessionDirectory> Drop for SyncEngine<D> {
    fn drop(&mut self) {
        if let Some(inbound) = self.inbound.take() {
            inbound.abort();
        }
    }
}

/// Results of preset-book operations that say whether the book changed.
trait Persisted {
    fn changed(&self) -> bool;
}

impl Persisted for bool {
    fn changed(&self) -> bool {
        *self
    }
}

impl<T> Persisted for Option<T> {
    fn changed(&self) -> bool {
        self.is_some()
    }
}

fn lock_presets(presets: &StdMutex<PresetBook>) -> MutexGuard<'_, PresetBook> {
    presets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn game_state_persister(store: LocalStore) -> Debouncer<SessionSnapshot> {
    Debouncer::new(Duration::ZERO, move |snapshot: SessionSnapshot| {
        let store = store.clone();
        async move {
            let saved =
                tokio::task::spawn_blocking(move || store.save(GAME_STATE_KEY, &snapshot)).await;
            if let Err(error) = saved {
                warn!("[sync] game state save task failed: {error}");
            }
        }
    })
}
