use super::*;
use crate::types::PlayerStats;

impl Session {
    /// Ends the game when more than one player is seated and exactly one is
    /// still alive. Guarded by `game_ended`, so it fires once per game.
    pub(super) fn evaluate_victory(&mut self) -> bool {
        if self.game_ended || self.players.len() <= 1 {
            return false;
        }
        let mut alive = self.players.iter().filter(|player| !player.is_dead);
        let (Some(winner), None) = (alive.next(), alive.next()) else {
            return false;
        };
        let winner_id = winner.id;
        let winner_name = winner.name.clone();

        let starting_life = self.options.starting_life;
        for player in &mut self.players {
            let won = player.id == winner_id;
            player.has_crown = won;
            let (life, commander_damage, poison) =
                (player.life, player.commander_damage, player.poison_counters);
            record_game(
                &mut player.stats,
                won,
                life - starting_life,
                commander_damage,
                poison,
            );
        }

        self.history.append(&messages::won(&winner_name));
        self.game_ended = true;
        true
    }
}

/// Folds one finished game into the lifetime aggregates. Deltas carry no
/// attacker, so the dealt/given columns record the same final counters as
/// the received ones.
fn record_game(
    stats: &mut PlayerStats,
    won: bool,
    life_delta: i32,
    commander_damage: i32,
    poison: i32,
) {
    stats.games_played = stats.games_played.saturating_add(1);
    if won {
        stats.wins = stats.wins.saturating_add(1);
    }
    stats.total_life_gained = stats.total_life_gained.saturating_add(non_negative(life_delta));
    stats.total_life_lost = stats
        .total_life_lost
        .saturating_add(non_negative(life_delta.saturating_neg()));
    let commander_damage = non_negative(commander_damage);
    stats.total_commander_damage_dealt = stats
        .total_commander_damage_dealt
        .saturating_add(commander_damage);
    stats.total_commander_damage_received = stats
        .total_commander_damage_received
        .saturating_add(commander_damage);
    let poison = non_negative(poison);
    stats.total_poison_counters_given = stats.total_poison_counters_given.saturating_add(poison);
    stats.total_poison_counters_received = stats
        .total_poison_counters_received
        .saturating_add(poison);
}

fn non_negative(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}
