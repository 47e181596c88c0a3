use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ICON, STARTING_LIFE};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManaColor {
    White,
    Blue,
    Black,
    Red,
    Green,
}

impl ManaColor {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "white" => Some(Self::White),
            "blue" => Some(Self::Blue),
            "black" => Some(Self::Black),
            "red" => Some(Self::Red),
            "green" => Some(Self::Green),
            _ => None,
        }
    }
}

/// Lifetime aggregates for one player record. Survives `reset_game`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    pub games_played: u32,
    pub wins: u32,
    pub total_life_gained: u32,
    pub total_life_lost: u32,
    pub total_commander_damage_dealt: u32,
    pub total_commander_damage_received: u32,
    pub total_poison_counters_given: u32,
    pub total_poison_counters_received: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub life: i32,
    pub mana_color: ManaColor,
    pub commander_damage: i32,
    pub poison_counters: i32,
    pub is_dead: bool,
    pub has_crown: bool,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default)]
    pub stats: PlayerStats,
}

impl Player {
    pub fn new(id: PlayerId, mana_color: ManaColor, starting_life: i32) -> Self {
        Self {
            id,
            name: format!("Player {}", id.0),
            life: starting_life,
            mana_color,
            commander_damage: 0,
            poison_counters: 0,
            is_dead: false,
            has_crown: false,
            icon: default_icon(),
            stats: PlayerStats::default(),
        }
    }

    /// Clears vitals and status flags, leaving identity and stats intact.
    pub fn reset_vitals(&mut self, starting_life: i32) {
        self.life = starting_life;
        self.commander_damage = 0;
        self.poison_counters = 0;
        self.is_dead = false;
        self.has_crown = false;
    }
}

fn default_icon() -> String {
    DEFAULT_ICON.to_string()
}

impl Default for Player {
    fn default() -> Self {
        Self::new(PlayerId(1), ManaColor::White, STARTING_LIFE)
    }
}

/// The document exchanged with the session directory and the local store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub players: Vec<Player>,
    #[serde(default)]
    pub game_history: Vec<String>,
    #[serde(default)]
    pub game_ended: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum VitalsDelta {
    Life(i32),
    CommanderDamage(i32),
    Poison(i32),
}

impl VitalsDelta {
    pub fn amount(self) -> i32 {
        match self {
            Self::Life(amount) | Self::CommanderDamage(amount) | Self::Poison(amount) => amount,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EliminationCause {
    LifeLoss,
    CommanderDamage,
    Poison,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_uses_camel_case_wire_names() {
        let snapshot = SessionSnapshot {
            players: vec![Player::default()],
            game_history: vec!["[10:00:00] Player 1 has joined the game.".to_string()],
            game_ended: false,
        };
        let json = serde_json::to_value(&snapshot).expect("serialize");
        assert!(json.get("gameHistory").is_some());
        assert!(json.get("gameEnded").is_some());
        let player = &json["players"][0];
        assert_eq!(player["commanderDamage"], 0);
        assert_eq!(player["manaColor"], "white");
        assert_eq!(player["stats"]["gamesPlayed"], 0);
    }

    #[test]
    fn player_without_stats_gets_defaults() {
        let raw = r#"{
  "id": 3,
  "name": "Nissa",
  "life": 31,
  "manaColor": "green",
  "commanderDamage": 4,
  "poisonCounters": 0,
  "isDead": false,
  "hasCrown": false
}"#;
        let player: Player = serde_json::from_str(raw).expect("parse");
        assert_eq!(player.id, PlayerId(3));
        assert_eq!(player.stats, PlayerStats::default());
        assert_eq!(player.icon, DEFAULT_ICON);
    }

    #[test]
    fn vitals_delta_wire_shape() {
        let json = serde_json::to_string(&VitalsDelta::CommanderDamage(7)).expect("serialize");
        assert_eq!(json, r#"{"kind":"commander_damage","amount":7}"#);
        let parsed: VitalsDelta = serde_json::from_str(r#"{"kind":"poison","amount":-1}"#)
            .expect("parse");
        assert_eq!(parsed, VitalsDelta::Poison(-1));
        assert_eq!(parsed.amount(), -1);
    }
}
