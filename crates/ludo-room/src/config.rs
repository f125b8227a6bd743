//! Lobby and game settings.

use std::time::Duration;

use ludo_board::position::MAX_SEATS;
use ludo_board::RuleSet;
use ludo_timer::TurnTimerConfig;
use serde::Deserialize;
use tracing::warn;

/// Room and lobby settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    /// Members at which a room is full (and, with `auto_start`, promoted).
    pub max_players: usize,
    /// Members needed before the creator may start early.
    pub min_players: usize,
    /// Promote and start a room as soon as it is full.
    pub auto_start: bool,
    /// Open rooms with no activity for this long are swept.
    pub idle_room_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Capacity of each game session's command queue.
    pub command_channel_size: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            max_players: MAX_SEATS,
            min_players: 2,
            auto_start: true,
            idle_room_timeout_secs: 600,
            sweep_interval_secs: 30,
            command_channel_size: 64,
        }
    }
}

impl LobbyConfig {
    /// Clamps player limits to what the board supports.
    pub fn validated(mut self) -> Self {
        let max = self.max_players.clamp(2, MAX_SEATS);
        if max != self.max_players {
            warn!(requested = self.max_players, max, "max_players out of range, clamping");
            self.max_players = max;
        }
        let min = self.min_players.clamp(2, self.max_players);
        if min != self.min_players {
            warn!(requested = self.min_players, min, "min_players out of range, clamping");
            self.min_players = min;
        }
        if self.command_channel_size == 0 {
            warn!("command_channel_size must be positive, using 1");
            self.command_channel_size = 1;
        }
        if self.sweep_interval_secs == 0 {
            warn!("sweep_interval_secs must be positive, using 1");
            self.sweep_interval_secs = 1;
        }
        self
    }

    pub fn idle_room_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_room_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Settings applied to every new game.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Seconds a player has to act before their turn is skipped. 0 disables.
    pub turn_timeout_secs: u64,
    pub rules: RuleSet,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            turn_timeout_secs: TurnTimerConfig::default().turn_timeout_secs,
            rules: RuleSet::default(),
        }
    }
}

impl GameConfig {
    pub fn timer(&self) -> TurnTimerConfig {
        TurnTimerConfig::with_timeout_secs(self.turn_timeout_secs).validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lobby_defaults() {
        let config = LobbyConfig::default();
        assert_eq!(config.max_players, 4);
        assert_eq!(config.min_players, 2);
        assert!(config.auto_start);
    }

    #[test]
    fn test_validated_clamps_player_limits() {
        let config = LobbyConfig {
            max_players: 9,
            min_players: 0,
            ..LobbyConfig::default()
        }
        .validated();
        assert_eq!(config.max_players, 4);
        assert_eq!(config.min_players, 2);

        let config = LobbyConfig {
            max_players: 3,
            min_players: 4,
            ..LobbyConfig::default()
        }
        .validated();
        assert_eq!(config.min_players, 3);
    }

    #[test]
    fn test_game_config_timer_defaults_to_thirty_seconds() {
        assert_eq!(GameConfig::default().timer().turn_timeout_secs, 30);
    }
}
