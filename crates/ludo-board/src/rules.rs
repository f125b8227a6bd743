//! Configurable rule variations.

use serde::{Deserialize, Serialize};

/// House rules applied by the engine and the turn machine.
///
/// Every field has a default, so a config file only needs to name the
/// rules it changes:
///
/// ```toml
/// [game.rules]
/// blocking = true
/// bonus_on_capture = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// Consecutive sixes that forfeit the turn instead of granting another
    /// roll. 0 disables the cap.
    pub max_consecutive_sixes: u8,

    /// A six grants another roll after the move.
    pub bonus_on_six: bool,

    /// Capturing an opposing pawn grants another roll.
    pub bonus_on_capture: bool,

    /// Finishing a pawn grants another roll.
    pub bonus_on_finish: bool,

    /// Two or more pawns of one color on a ring cell form a block that
    /// opposing pawns can neither pass nor land on.
    pub blocking: bool,

    /// Consecutive turn timeouts after which a player forfeits.
    /// 0 means timeouts only ever skip the turn.
    pub forfeit_after_missed_turns: u32,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            max_consecutive_sixes: 3,
            bonus_on_six: true,
            bonus_on_capture: true,
            bonus_on_finish: false,
            blocking: false,
            forfeit_after_missed_turns: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let rules: RuleSet =
            serde_json::from_str(r#"{"blocking": true}"#).unwrap();
        assert!(rules.blocking);
        assert_eq!(rules.max_consecutive_sixes, 3);
        assert!(rules.bonus_on_six);
    }
}
