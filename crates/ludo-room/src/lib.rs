//! Rooms, lobby and game sessions for the Ludo server.
//!
//! # Lifecycle
//!
//! ```text
//! register_room ─▶ Room (Open) ─join…─▶ full / create_game
//!                                          │
//!                                   escrow every stake
//!                                   ├─ all held ─▶ Game session actor ─▶ payout ─▶ archive
//!                                   └─ any failed ─▶ refund, evict, room Open again
//! ```
//!
//! # Key types
//!
//! - [`LobbyManager`]: every room and game operation the gateway exposes
//! - [`SessionRegistry`]: concurrent lookup tables for rooms, games and users
//! - [`GameHandle`]: sends commands to a running game session
//! - [`Room`]: a pre-game room record

mod config;
mod error;
mod lobby;
mod registry;
mod room;
mod session;

pub use config::{GameConfig, LobbyConfig};
pub use error::LobbyError;
pub use lobby::{CreateGameOutcome, LobbyManager, Promotion};
pub use registry::SessionRegistry;
pub use room::Room;
pub use session::{spawn_session, GameHandle};
