//! Saved rosters. A preset either carries a bare roster (loaded with fresh
//! vitals) or a full embedded game state (loaded as-is).
//!
//! The book also remembers which preset the table is playing. A reset or a
//! finished game collapses that preset back to a bare roster.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::constants::{PRESETS_KEY, STARTING_LIFE};
use crate::local_store::LocalStore;
use crate::server_utils::sanitize_name;
use crate::types::{Player, SessionSnapshot};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub players: Vec<Player>,
    #[serde(default)]
    pub game_state: Option<SessionSnapshot>,
}

#[derive(Clone, Debug, Default)]
pub struct PresetBook {
    presets: Vec<Preset>,
    current: Option<String>,
}

impl PresetBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(store: &LocalStore) -> Self {
        Self {
            presets: store.load(PRESETS_KEY).unwrap_or_default(),
            current: None,
        }
    }

    pub fn save(&self, store: &LocalStore) {
        store.save(PRESETS_KEY, &self.presets);
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn get(&self, id: &str) -> Option<&Preset> {
        self.presets.iter().find(|preset| preset.id == id)
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current(&self) -> Option<&Preset> {
        self.current.as_deref().and_then(|id| self.get(id))
    }

    /// Marks `id` as the preset being played.
    pub fn select(&mut self, id: &str) -> Option<&Preset> {
        let index = self.presets.iter().position(|preset| preset.id == id)?;
        self.current = Some(id.to_string());
        self.presets.get(index)
    }

    /// Stores the roster with fresh vitals and no game state. Blank names
    /// are rejected.
    pub fn create(&mut self, name: &str, players: &[Player]) -> Option<String> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let preset = Preset {
            id: self.make_id(),
            name: name.to_string(),
            players: players
                .iter()
                .cloned()
                .map(|mut player| {
                    player.reset_vitals(STARTING_LIFE);
                    player
                })
                .collect(),
            game_state: None,
        };
        let id = preset.id.clone();
        self.presets.push(preset);
        Some(id)
    }

    pub fn rename(&mut self, id: &str, name: &str) -> bool {
        let Some(preset) = self.presets.iter_mut().find(|preset| preset.id == id) else {
            return false;
        };
        preset.name = sanitize_name(name, &preset.name);
        true
    }

    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.presets.len();
        self.presets.retain(|preset| preset.id != id);
        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
        self.presets.len() != before
    }

    /// Embeds the running game into the current preset, or into a new
    /// `Game <ms>` preset that becomes current. Returns the id written and
    /// whether it was created.
    pub fn save_game_state(&mut self, snapshot: &SessionSnapshot) -> (String, bool) {
        if let Some(preset) = self
            .current
            .as_deref()
            .and_then(|id| self.presets.iter_mut().find(|preset| preset.id == id))
        {
            preset.players = snapshot.players.clone();
            preset.game_state = Some(snapshot.clone());
            return (preset.id.clone(), false);
        }

        let id = self.make_id();
        self.presets.push(Preset {
            id: id.clone(),
            name: format!("Game {}", now_ms()),
            players: snapshot.players.clone(),
            game_state: Some(snapshot.clone()),
        });
        self.current = Some(id.clone());
        (id, true)
    }

    /// Collapses the current preset back to a bare roster, as after a reset
    /// or a finished game.
    pub fn clear_game_state(&mut self, players: &[Player]) -> bool {
        let Some(preset) = self
            .current
            .as_deref()
            .and_then(|id| self.presets.iter_mut().find(|preset| preset.id == id))
        else {
            return false;
        };
        preset.players = players.to_vec();
        preset.game_state = None;
        true
    }

    fn make_id(&self) -> String {
        let mut candidate = now_ms();
        while self.get(&candidate.to_string()).is_some() {
            candidate += 1;
        }
        candidate.to_string()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
