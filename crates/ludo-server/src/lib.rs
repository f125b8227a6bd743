//! # Ludo server
//!
//! Real-time, server-authoritative multiplayer Ludo over WebSocket, with
//! staked rooms settled through an external wallet.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ludo_server::prelude::*;
//!
//! # async fn run() -> Result<(), LudoError> {
//! let auth = StaticTokenAuthenticator::new().with_token("secret", "alice");
//! let server = LudoServerBuilder::new()
//!     .bind("127.0.0.1:8080")
//!     .build(auth, InMemoryWallet::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod gateway;
mod server;

pub use config::{ServerConfig, WalletConfig, BIND_ADDR_ENV};
pub use error::LudoError;
pub use server::{LudoServer, LudoServerBuilder};

pub mod prelude {
    pub use crate::{LudoError, LudoServer, LudoServerBuilder, ServerConfig};
    pub use ludo_board::{random_dice_factory, DiceFactory, RuleSet, ScriptedDice, UserId};
    pub use ludo_session::{Authenticator, StaticTokenAuthenticator};
    pub use ludo_wallet::{InMemoryWallet, Wallet};
}
