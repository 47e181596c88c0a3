//! Vitals rules: pure functions from a player record and a delta to the
//! updated record plus the history lines the change produces.
//!
//! Elimination is recomputed from the full predicate after every delta and is
//! sticky for the rest of the game: a player who is already dead stays dead
//! until the session is reset, whatever later deltas do to their counters.

use crate::constants::{LETHAL_COMMANDER_DAMAGE, LETHAL_POISON_COUNTERS};
use crate::event_log::messages;
use crate::types::{EliminationCause, Player, VitalsDelta};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VitalsOutcome {
    pub player: Player,
    pub events: Vec<String>,
    pub eliminated: Option<EliminationCause>,
}

impl VitalsOutcome {
    fn unchanged(player: &Player) -> Self {
        Self {
            player: player.clone(),
            events: Vec::new(),
            eliminated: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

pub fn is_eliminated(player: &Player) -> bool {
    elimination_causes(player).next().is_some()
}

fn elimination_causes(player: &Player) -> impl Iterator<Item = EliminationCause> {
    [
        (player.life == 0, EliminationCause::LifeLoss),
        (
            player.commander_damage >= LETHAL_COMMANDER_DAMAGE,
            EliminationCause::CommanderDamage,
        ),
        (
            player.poison_counters >= LETHAL_POISON_COUNTERS,
            EliminationCause::Poison,
        ),
    ]
    .into_iter()
    .filter_map(|(holds, cause)| holds.then_some(cause))
}

pub fn apply_delta(player: &Player, delta: VitalsDelta) -> VitalsOutcome {
    match delta {
        VitalsDelta::Life(amount) => apply_life_delta(player, amount),
        VitalsDelta::CommanderDamage(amount) => apply_commander_damage_delta(player, amount),
        VitalsDelta::Poison(amount) => apply_poison_delta(player, amount),
    }
}

pub fn apply_life_delta(player: &Player, amount: i32) -> VitalsOutcome {
    if amount == 0 {
        return VitalsOutcome::unchanged(player);
    }
    let mut next = player.clone();
    next.life = clamped_add(player.life, amount);
    let event = messages::life_changed(&next.name, amount, next.life);
    settle(player, next, EliminationCause::LifeLoss, event)
}

/// Commander damage also drains life one-for-one; negative amounts undo both.
pub fn apply_commander_damage_delta(player: &Player, amount: i32) -> VitalsOutcome {
    if amount == 0 {
        return VitalsOutcome::unchanged(player);
    }
    let mut next = player.clone();
    next.commander_damage = clamped_add(player.commander_damage, amount);
    next.life = clamped_add(player.life, amount.saturating_neg());
    let event = messages::commander_damage_changed(&next.name, amount, next.commander_damage);
    settle(player, next, EliminationCause::CommanderDamage, event)
}

pub fn apply_poison_delta(player: &Player, amount: i32) -> VitalsOutcome {
    if amount == 0 {
        return VitalsOutcome::unchanged(player);
    }
    let mut next = player.clone();
    next.poison_counters = clamped_add(player.poison_counters, amount);
    let event = messages::poison_changed(&next.name, amount, next.poison_counters);
    settle(player, next, EliminationCause::Poison, event)
}

fn settle(
    before: &Player,
    mut after: Player,
    primary: EliminationCause,
    change_event: String,
) -> VitalsOutcome {
    let mut events = vec![change_event];
    let mut eliminated = None;

    after.is_dead = before.is_dead || is_eliminated(&after);
    if after.is_dead && !before.is_dead {
        let causes: Vec<EliminationCause> = elimination_causes(&after).collect();
        let cause = if causes.contains(&primary) {
            primary
        } else {
            causes.first().copied().unwrap_or(primary)
        };
        events.push(messages::eliminated(&after.name, cause));
        eliminated = Some(cause);
    }

    VitalsOutcome {
        player: after,
        events,
        eliminated,
    }
}

fn clamped_add(value: i32, amount: i32) -> i32 {
    value.saturating_add(amount).max(0)
}
