//! `LudoServer` builder and server loop.
//!
//! This is the entry point for running a Ludo server. It ties together
//! all the layers: transport → protocol → session → lobby/games → wallet.

use std::sync::Arc;
use std::time::Instant;

use ludo_board::{random_dice_factory, DiceFactory};
use ludo_protocol::{Codec, JsonCodec};
use ludo_room::{LobbyManager, SessionRegistry};
use ludo_session::{Authenticator, SessionManager};
use ludo_transport::{Transport, WebSocketTransport};
use ludo_wallet::Wallet;
use tracing::{debug, error, info};

use crate::gateway::handle_connection;
use crate::{LudoError, ServerConfig};

/// Shared server state passed to each connection task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. Everything
/// mutable inside is already concurrent (`DashMap`s and actors), so there
/// is no lock here.
pub(crate) struct ServerState<A: Authenticator, C: Codec, W: Wallet> {
    pub(crate) config: ServerConfig,
    pub(crate) lobby: LobbyManager<W>,
    pub(crate) auth: A,
    pub(crate) codec: C,
}

/// Builder for configuring and starting a Ludo server.
///
/// # Example
///
/// ```rust,ignore
/// let server = LudoServerBuilder::new()
///     .config(ServerConfig::load("ludo.toml")?)
///     .build(auth, InMemoryWallet::new())
///     .await?;
/// server.run().await
/// ```
pub struct LudoServerBuilder {
    config: ServerConfig,
    dice: DiceFactory,
}

impl LudoServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            dice: random_dice_factory(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Dice for every new game. Defaults to independently seeded random
    /// dice.
    pub fn dice(mut self, dice: DiceFactory) -> Self {
        self.dice = dice;
        self
    }

    /// Binds the listener and wires the layers together.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<A: Authenticator, W: Wallet>(
        self,
        auth: A,
        wallet: W,
    ) -> Result<LudoServer<A, JsonCodec, W>, LudoError> {
        let config = self.config.validated();
        let transport = WebSocketTransport::bind(&config.bind_addr).await?;

        let sessions = Arc::new(SessionManager::new(config.session.clone()));
        let lobby = LobbyManager::new(
            Arc::new(SessionRegistry::new()),
            sessions,
            Arc::new(wallet),
            config.lobby.clone(),
            config.game.clone(),
            self.dice,
        );

        let state = Arc::new(ServerState {
            config,
            lobby,
            auth,
            codec: JsonCodec,
        });
        Ok(LudoServer { transport, state })
    }
}

impl Default for LudoServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Ludo server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct LudoServer<A: Authenticator, C: Codec, W: Wallet> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, C, W>>,
}

impl<A, C, W> LudoServer<A, C, W>
where
    A: Authenticator,
    C: Codec,
    W: Wallet,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the accept loop and the idle sweeper. Runs until the process
    /// is terminated.
    pub async fn run(mut self) -> Result<(), LudoError> {
        info!(addr = %self.state.config.bind_addr, "Ludo server running");
        tokio::spawn(sweep_loop(Arc::clone(&self.state)));

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// Periodically closes idle rooms and expires sessions past their
/// reconnect grace period.
async fn sweep_loop<A: Authenticator, C: Codec, W: Wallet>(state: Arc<ServerState<A, C, W>>) {
    let mut interval = tokio::time::interval(state.lobby.config().sweep_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let rooms = state.lobby.sweep_idle(Instant::now()).await;
        let sessions = state.lobby.sessions();
        let expired = sessions.expire_stale();
        sessions.cleanup_expired();
        if rooms > 0 || !expired.is_empty() {
            info!(rooms, sessions = expired.len(), "sweep completed");
        }
    }
}
