//! Session state machine: owns the roster, the event log and the `game_ended`
//! flag, and is the only place they are mutated.
//!
//! Phases run `Empty -> Active -> Ended -> Active (reset)`. While ended,
//! vitals deltas are rejected; roster edits and reset stay available.
//! Every mutator returns whether anything changed so callers know when a
//! publish is due.

use crate::constants::{next_mana_color, MAX_PLAYERS, STARTING_LIFE};
use crate::event_log::{messages, EventLog};
use crate::presets::Preset;
use crate::server_utils::sanitize_name;
use crate::types::{ManaColor, Player, PlayerId, SessionSnapshot, VitalsDelta};
use crate::vitals;

mod victory;

#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    pub max_players: usize,
    pub starting_life: i32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_players: MAX_PLAYERS,
            starting_life: STARTING_LIFE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Active,
    Ended,
}

#[derive(Clone, Debug)]
pub struct Session {
    options: SessionOptions,
    players: Vec<Player>,
    history: EventLog,
    game_ended: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            players: Vec::new(),
            history: EventLog::new(),
            game_ended: false,
        }
    }

    pub fn from_snapshot(snapshot: SessionSnapshot, options: SessionOptions) -> Self {
        Self {
            options,
            players: snapshot.players,
            history: EventLog::from_entries(snapshot.game_history),
            game_ended: snapshot.game_ended,
        }
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn phase(&self) -> Phase {
        if self.game_ended {
            Phase::Ended
        } else if self.players.is_empty() {
            Phase::Empty
        } else {
            Phase::Active
        }
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|player| player.id == id)
    }

    pub fn history(&self) -> &EventLog {
        &self.history
    }

    pub fn is_game_ended(&self) -> bool {
        self.game_ended
    }

    pub fn winner(&self) -> Option<&Player> {
        self.players.iter().find(|player| player.has_crown)
    }

    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|player| !player.is_dead).count()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            players: self.players.clone(),
            game_history: self.history.entries().to_vec(),
            game_ended: self.game_ended,
        }
    }

    /// Seats a default player in the next free id and mana colour.
    pub fn add_player(&mut self) -> Option<PlayerId> {
        if self.players.len() >= self.options.max_players {
            return None;
        }
        let id = self.next_player_id()?;
        let taken: Vec<ManaColor> = self.players.iter().map(|player| player.mana_color).collect();
        let player = Player::new(id, next_mana_color(&taken), self.options.starting_life);
        self.history.append(&messages::joined(&player.name));
        self.players.push(player);
        Some(id)
    }

    /// One past the highest seated id. Inbound snapshots can carry any id,
    /// so past `u32::MAX` this falls back to the lowest free one.
    fn next_player_id(&self) -> Option<PlayerId> {
        let highest = self.players.iter().map(|player| player.id.0).max().unwrap_or(0);
        highest
            .checked_add(1)
            .or_else(|| {
                (1..=u32::MAX).find(|candidate| self.player(PlayerId(*candidate)).is_none())
            })
            .map(PlayerId)
    }

    pub fn remove_player(&mut self, id: PlayerId) -> bool {
        let Some(index) = self.players.iter().position(|player| player.id == id) else {
            return false;
        };
        let removed = self.players.remove(index);
        self.history.append(&messages::removed(&removed.name));
        self.evaluate_victory();
        true
    }

    pub fn apply_vitals_delta(&mut self, id: PlayerId, delta: VitalsDelta) -> bool {
        if self.game_ended {
            return false;
        }
        let Some(index) = self.players.iter().position(|player| player.id == id) else {
            return false;
        };
        let outcome = vitals::apply_delta(&self.players[index], delta);
        if outcome.is_noop() {
            return false;
        }
        self.players[index] = outcome.player;
        for event in &outcome.events {
            self.history.append(event);
        }
        self.evaluate_victory();
        true
    }

    /// Replaces a roster entry wholesale. Victory is not re-evaluated.
    pub fn update_player(&mut self, updated: Player) -> bool {
        let Some(slot) = self.players.iter_mut().find(|player| player.id == updated.id) else {
            return false;
        };
        self.history.append(&messages::updated(&updated.name));
        *slot = updated;
        true
    }

    pub fn rename_player(&mut self, id: PlayerId, name: &str) -> bool {
        let Some(current) = self.player(id) else {
            return false;
        };
        let mut updated = current.clone();
        updated.name = sanitize_name(name, &current.name);
        self.update_player(updated)
    }

    pub fn set_icon(&mut self, id: PlayerId, icon: &str) -> bool {
        let Some(current) = self.player(id) else {
            return false;
        };
        let mut updated = current.clone();
        updated.icon = icon.trim().to_string();
        self.update_player(updated)
    }

    /// Appends a table-level note. Allowed in any phase.
    pub fn log_event(&mut self, message: &str) {
        self.history.append(message);
    }

    pub fn time_up(&mut self) {
        self.log_event(&messages::time_up());
    }

    pub fn reset_game(&mut self) {
        let starting_life = self.options.starting_life;
        for player in &mut self.players {
            player.reset_vitals(starting_life);
        }
        self.history.restart(&messages::reset());
        self.game_ended = false;
    }

    /// Replaces roster, history and flag with an inbound snapshot. A snapshot
    /// equal to local state is ignored.
    pub fn apply_remote(&mut self, snapshot: SessionSnapshot) -> bool {
        if snapshot.players == self.players
            && snapshot.game_history == self.history.entries()
            && snapshot.game_ended == self.game_ended
        {
            return false;
        }
        self.players = snapshot.players;
        self.history.replace(snapshot.game_history);
        self.game_ended = snapshot.game_ended;
        true
    }

    pub fn load_preset(&mut self, preset: &Preset) {
        match &preset.game_state {
            Some(state) => {
                self.players = state.players.clone();
                self.history.replace(state.game_history.clone());
                self.game_ended = state.game_ended;
            }
            None => {
                let starting_life = self.options.starting_life;
                self.players = preset
                    .players
                    .iter()
                    .cloned()
                    .map(|mut player| {
                        player.reset_vitals(starting_life);
                        player
                    })
                    .collect();
                self.history.replace(Vec::new());
                self.game_ended = false;
            }
        }
    }
}
