//! Append-only, human readable game history.
//!
//! Every entry is `"[HH:MM:SS] <message>"` in local wall-clock time. The log is
//! only ever appended to, cleared to a single entry by a reset, or replaced
//! wholesale by an inbound snapshot.

use chrono::{DateTime, Local};

use crate::types::EliminationCause;

#[derive(Clone, Debug, Default)]
pub struct EventLog {
    entries: Vec<String>,
    last_stamp: Option<DateTime<Local>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<String>) -> Self {
        Self {
            entries,
            last_stamp: None,
        }
    }

    pub fn append(&mut self, message: &str) {
        self.append_at(message, Local::now());
    }

    /// Appends with an explicit clock reading. A reading earlier than the
    /// previous append is raised to it so stamps never go backwards.
    pub fn append_at(&mut self, message: &str, at: DateTime<Local>) {
        let stamp = match self.last_stamp {
            Some(last) if last > at => last,
            _ => at,
        };
        self.last_stamp = Some(stamp);
        self.entries.push(format_entry(stamp, message));
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.last().map(|entry| entry.as_str())
    }

    pub fn contains(&self, message: &str) -> bool {
        self.entries.iter().any(|entry| entry_message(entry) == message)
    }

    /// Replaces the whole log, as an inbound snapshot does.
    pub fn replace(&mut self, entries: Vec<String>) {
        self.entries = entries;
    }

    pub fn restart(&mut self, message: &str) {
        self.entries.clear();
        self.append(message);
    }
}

pub fn format_entry(at: DateTime<Local>, message: &str) -> String {
    format!("[{}] {message}", at.format("%H:%M:%S"))
}

/// Strips the `[HH:MM:SS] ` prefix. Entries without one are returned as-is.
pub fn entry_message(entry: &str) -> &str {
    match entry.strip_prefix('[').and_then(|rest| rest.split_once("] ")) {
        Some((_, message)) => message,
        None => entry,
    }
}

pub mod messages {
    use super::EliminationCause;

    pub fn joined(name: &str) -> String {
        format!("{name} has joined the game.")
    }

    pub fn removed(name: &str) -> String {
        format!("{name} has been removed from the game.")
    }

    pub fn life_changed(name: &str, amount: i32, total: i32) -> String {
        format!(
            "{name} {} {} life. New total: {total}",
            gained_or_lost(amount),
            amount.unsigned_abs()
        )
    }

    pub fn commander_damage_changed(name: &str, amount: i32, total: i32) -> String {
        if amount >= 0 {
            format!("{name} received {amount} commander damage. New total: {total}")
        } else {
            format!(
                "{name} healed {} commander damage. New total: {total}",
                amount.unsigned_abs()
            )
        }
    }

    pub fn poison_changed(name: &str, amount: i32, total: i32) -> String {
        format!(
            "{name} {} {} poison counters. New total: {total}",
            gained_or_lost(amount),
            amount.unsigned_abs()
        )
    }

    pub fn eliminated(name: &str, cause: EliminationCause) -> String {
        match cause {
            EliminationCause::LifeLoss => {
                format!("{name} has been eliminated due to loss of life!")
            }
            EliminationCause::CommanderDamage => {
                format!("{name} has been eliminated by commander damage!")
            }
            EliminationCause::Poison => format!("{name} has been eliminated by poison!"),
        }
    }

    pub fn updated(name: &str) -> String {
        format!("{name}'s information has been updated.")
    }

    pub fn won(name: &str) -> String {
        format!("{name} has won the game!")
    }

    pub fn reset() -> String {
        "Game has been reset. New game starting!".to_string()
    }

    pub fn time_up() -> String {
        "Time's up!".to_string()
    }

    pub fn game_state_saved() -> String {
        "Current game state saved.".to_string()
    }

    pub fn game_state_saved_as_new_preset() -> String {
        "New preset created with current game state.".to_string()
    }

    fn gained_or_lost(amount: i32) -> &'static str {
        if amount > 0 {
            "gained"
        } else {
            "lost"
        }
    }
}
