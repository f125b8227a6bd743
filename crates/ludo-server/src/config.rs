//! Server configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration:
//!
//! ```toml
//! bind_addr = "0.0.0.0:8080"
//!
//! [lobby]
//! max_players = 4
//! auto_start = true
//!
//! [game]
//! turn_timeout_secs = 30
//!
//! [game.rules]
//! blocking = true
//! ```

use std::path::Path;
use std::time::Duration;

use ludo_room::{GameConfig, LobbyConfig};
use ludo_session::SessionConfig;
use serde::Deserialize;
use tracing::{info, warn};

use crate::LudoError;

/// Environment variable that overrides `bind_addr`.
pub const BIND_ADDR_ENV: &str = "LUDO_BIND_ADDR";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Seconds a new connection has to send its handshake.
    pub handshake_timeout_secs: u64,
    /// Seconds without any inbound frame, pings included, before a
    /// connection is dropped. Never shorter than a full round of turn
    /// timers, so a player waiting on the others is not cut off.
    pub idle_timeout_secs: u64,
    pub session: SessionConfig,
    pub lobby: LobbyConfig,
    pub game: GameConfig,
    pub wallet: WalletConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            handshake_timeout_secs: 5,
            idle_timeout_secs: 180,
            session: SessionConfig::default(),
            lobby: LobbyConfig::default(),
            game: GameConfig::default(),
            wallet: WalletConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Balance for `create_wallet` when the client names none.
    pub opening_balance: i64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            opening_balance: 1000,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, LudoError> {
        toml::from_str(raw).map_err(|e| LudoError::Config(e.to_string()))
    }

    /// Reads `path`, applies environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LudoError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LudoError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&raw)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config.with_env_overrides().validated())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = std::env::var(BIND_ADDR_ENV) {
            if !addr.trim().is_empty() {
                info!(bind_addr = %addr, env = BIND_ADDR_ENV, "bind address overridden from environment");
                self.bind_addr = addr.trim().to_string();
            }
        }
        self
    }

    /// Clamps out-of-range values, logging a warning for each.
    pub fn validated(mut self) -> Self {
        if self.handshake_timeout_secs == 0 {
            warn!("handshake_timeout_secs must be positive, using 1");
            self.handshake_timeout_secs = 1;
        }
        if self.idle_timeout_secs == 0 {
            warn!("idle_timeout_secs must be positive, using 1");
            self.idle_timeout_secs = 1;
        }
        if self.wallet.opening_balance < 0 {
            warn!(
                requested = self.wallet.opening_balance,
                "opening_balance must not be negative, using 0"
            );
            self.wallet.opening_balance = 0;
        }
        self.game.turn_timeout_secs = self.game.timer().turn_timeout_secs;
        self.lobby = self.lobby.validated();
        let round = self.lobby.max_players as u64 * self.game.turn_timeout_secs;
        if self.idle_timeout_secs < round {
            warn!(
                requested = self.idle_timeout_secs,
                round, "idle_timeout_secs shorter than a round of turns, raising"
            );
            self.idle_timeout_secs = round;
        }
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
