use crate::types::ManaColor;

pub const STARTING_LIFE: i32 = 40;
pub const LETHAL_COMMANDER_DAMAGE: i32 = 21;
pub const LETHAL_POISON_COUNTERS: i32 = 10;
pub const MAX_PLAYERS: usize = 4;
pub const MAX_NAME_CHARS: usize = 24;

pub const PUBLISH_WINDOW_MS: u64 = 300;
pub const INBOUND_QUEUE_DEPTH: usize = 64;
pub const SESSION_ID_LEN: usize = 10;

pub const DEFAULT_ICON: &str =
    "https://gatherer.wizards.com/Handlers/Image.ashx?type=card&multiverseid=0";

pub const MANA_PALETTE: [ManaColor; 5] = [
    ManaColor::White,
    ManaColor::Blue,
    ManaColor::Black,
    ManaColor::Red,
    ManaColor::Green,
];

pub const GAME_STATE_KEY: &str = "gameState";
pub const PRESETS_KEY: &str = "presets";

pub fn next_mana_color(taken: &[ManaColor]) -> ManaColor {
    MANA_PALETTE
        .iter()
        .copied()
        .find(|color| !taken.contains(color))
        .unwrap_or(MANA_PALETTE[taken.len() % MANA_PALETTE.len()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_mana_color_skips_taken_slots() {
        assert_eq!(next_mana_color(&[]), ManaColor::White);
        assert_eq!(
            next_mana_color(&[ManaColor::White, ManaColor::Black]),
            ManaColor::Blue
        );
    }

    #[test]
    fn next_mana_color_wraps_when_palette_is_exhausted() {
        let taken = MANA_PALETTE.to_vec();
        assert_eq!(next_mana_color(&taken), ManaColor::White);
    }
}
