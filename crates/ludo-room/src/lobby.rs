//! Lobby: room registration, membership, escrow and promotion to games.
//!
//! Rooms are plain records in the [`SessionRegistry`]; only games get an
//! actor. Promotion escrows every member's stake first and creates the
//! game only when all stakes are held.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use ludo_board::{Action, DiceFactory, Game, GameError, GameId, GameView, MoveView, UserId};
use ludo_protocol::{RoomId, RoomState, RoomUpdateReason, RoomView, ServerMessage};
use ludo_session::SessionManager;
use ludo_timer::TurnTimer;
use ludo_wallet::{Wallet, WalletError};
use tracing::{debug, error, info, warn};

use crate::room::Room;
use crate::session::spawn_session;
use crate::{GameConfig, LobbyConfig, LobbyError, SessionRegistry};

/// Result of trying to turn a room into a game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Promotion {
    Started { game_id: GameId },
    /// Some stakes could not be escrowed. Those members were removed and
    /// the room is open again (or closed, if nobody is left).
    Aborted { evicted: Vec<UserId> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateGameOutcome {
    Promoted(Promotion),
    /// The room was already promoted; this is its game.
    Existing(GameView),
}

pub struct LobbyManager<W: Wallet> {
    registry: Arc<SessionRegistry>,
    sessions: Arc<SessionManager>,
    wallet: Arc<W>,
    config: LobbyConfig,
    game_config: GameConfig,
    dice: DiceFactory,
}

impl<W: Wallet> LobbyManager<W> {
    pub fn new(
        registry: Arc<SessionRegistry>,
        sessions: Arc<SessionManager>,
        wallet: Arc<W>,
        config: LobbyConfig,
        game_config: GameConfig,
        dice: DiceFactory,
    ) -> Self {
        Self {
            registry,
            sessions,
            wallet,
            config: config.validated(),
            game_config,
            dice,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn wallet(&self) -> &Arc<W> {
        &self.wallet
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    // -- rooms --------------------------------------------------------------

    /// Opens a room with `user` as creator and first member.
    pub fn register_room(
        &self,
        user: &UserId,
        name: &str,
        bet_amount: i64,
    ) -> Result<RoomView, LobbyError> {
        if bet_amount <= 0 {
            return Err(LobbyError::InvalidStake(bet_amount));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(LobbyError::InvalidRoomName);
        }
        if self.registry.is_busy(user) {
            return Err(LobbyError::AlreadyInRoom(user.clone()));
        }

        let id = self.registry.next_room_id();
        if !self.registry.claim_user_room(user, id) {
            return Err(LobbyError::AlreadyInRoom(user.clone()));
        }
        if !self.registry.claim_name(name, id) {
            self.registry.release_user_room(user, id);
            return Err(LobbyError::RoomNameTaken(name.to_owned()));
        }

        let room = Room::new(id, name.to_owned(), user.clone(), bet_amount);
        let view = room.view(self.config.max_players);
        self.registry.insert_room(room);
        info!(room_id = %id, name, creator = %user, bet_amount, "room created");
        Ok(view)
    }

    /// Adds `user` to the room named `name`.
    ///
    /// The joiner's `room_joined` is queued here, ahead of anything the
    /// join triggers, so clients always see it before promotion updates.
    /// A join that fills the room promotes it when `auto_start` is on.
    pub async fn join_room(&self, user: &UserId, name: &str) -> Result<RoomView, LobbyError> {
        let id = self
            .registry
            .room_id(name)
            .ok_or_else(|| LobbyError::RoomNotFound(name.to_owned()))?;
        if self.registry.user_game(user).is_some() {
            return Err(LobbyError::AlreadyInRoom(user.clone()));
        }
        match self.registry.user_room(user) {
            Some(current) if current == id => {
                return Err(LobbyError::AlreadyJoined {
                    user: user.clone(),
                    room: name.to_owned(),
                });
            }
            Some(_) => return Err(LobbyError::AlreadyInRoom(user.clone())),
            None => {}
        }
        if !self.registry.claim_user_room(user, id) {
            return Err(LobbyError::AlreadyInRoom(user.clone()));
        }

        let joined = {
            match self.registry.rooms.get_mut(&id) {
                None => Err(LobbyError::RoomNotFound(name.to_owned())),
                Some(mut room) => {
                    if room.members.len() >= self.config.max_players {
                        Err(LobbyError::RoomFull(name.to_owned()))
                    } else if !room.state.is_joinable() {
                        Err(LobbyError::InvalidRoomState {
                            room: name.to_owned(),
                            state: room.state.to_string(),
                        })
                    } else {
                        room.members.push(user.clone());
                        room.touch();
                        let others: Vec<UserId> =
                            room.members.iter().filter(|m| *m != user).cloned().collect();
                        let full = room.members.len() >= self.config.max_players;
                        Ok((room.view(self.config.max_players), others, full))
                    }
                }
            }
        };
        let (view, others, full) = match joined {
            Ok(joined) => joined,
            Err(err) => {
                self.registry.release_user_room(user, id);
                return Err(err);
            }
        };

        info!(room_id = %id, %user, players = view.player_count, "player joined room");
        self.sessions.send(
            user,
            Arc::new(ServerMessage::RoomJoined { room: view.clone() }),
        );
        self.sessions.broadcast(
            &others,
            Arc::new(ServerMessage::RoomUpdate {
                room: view.clone(),
                reason: RoomUpdateReason::MemberJoined,
            }),
        );

        if full && self.config.auto_start {
            if let Err(err) = self.promote(id).await {
                warn!(room_id = %id, error = %err, "promotion after join failed");
            }
        }
        Ok(view)
    }

    /// Removes `user` from a room. The creator leaving closes it.
    pub fn leave_room(&self, user: &UserId, name: &str) -> Result<RoomView, LobbyError> {
        let id = self
            .registry
            .room_id(name)
            .ok_or_else(|| LobbyError::RoomNotFound(name.to_owned()))?;

        let closes = {
            let mut room = self
                .registry
                .rooms
                .get_mut(&id)
                .ok_or_else(|| LobbyError::RoomNotFound(name.to_owned()))?;
            if !room.is_member(user) {
                return Err(LobbyError::NotRoomMember {
                    user: user.clone(),
                    room: name.to_owned(),
                });
            }
            if room.state != RoomState::Open {
                return Err(LobbyError::InvalidRoomState {
                    room: name.to_owned(),
                    state: room.state.to_string(),
                });
            }
            if room.creator == *user {
                true
            } else {
                room.remove_member(user);
                room.touch();
                false
            }
        };

        if closes {
            let mut room = self
                .registry
                .remove_room(id)
                .ok_or_else(|| LobbyError::RoomNotFound(name.to_owned()))?;
            room.state = RoomState::Closed;
            let view = room.view(self.config.max_players);
            info!(room_id = %id, creator = %user, "creator left, room closed");
            let others: Vec<UserId> = room.members.iter().filter(|m| *m != user).cloned().collect();
            self.sessions.broadcast(
                &others,
                Arc::new(ServerMessage::RoomUpdate {
                    room: view.clone(),
                    reason: RoomUpdateReason::Closed,
                }),
            );
            return Ok(view);
        }

        self.registry.release_user_room(user, id);
        let room = self
            .registry
            .room(id)
            .ok_or_else(|| LobbyError::RoomNotFound(name.to_owned()))?;
        let view = room.view(self.config.max_players);
        info!(room_id = %id, %user, players = view.player_count, "player left room");
        self.sessions.broadcast(
            &room.members,
            Arc::new(ServerMessage::RoomUpdate {
                room: view.clone(),
                reason: RoomUpdateReason::MemberLeft,
            }),
        );
        Ok(view)
    }

    /// Open rooms, oldest first.
    pub fn list_rooms(&self) -> Vec<RoomView> {
        self.registry
            .rooms()
            .iter()
            .filter(|r| r.state.is_joinable())
            .map(|r| r.view(self.config.max_players))
            .collect()
    }

    /// Starts a room's game before it is full. Only the creator may, and
    /// only once `min_players` have joined. Asking again after promotion
    /// returns the game that was created.
    pub async fn create_game(
        &self,
        user: &UserId,
        name: &str,
    ) -> Result<CreateGameOutcome, LobbyError> {
        if let Some(id) = self.registry.room_id(name) {
            let room = self
                .registry
                .room(id)
                .ok_or_else(|| LobbyError::RoomNotFound(name.to_owned()))?;
            if room.creator != *user {
                return Err(LobbyError::NotRoomCreator(name.to_owned()));
            }
            if room.members.len() < self.config.min_players {
                return Err(LobbyError::NotEnoughPlayers {
                    room: name.to_owned(),
                    have: room.members.len(),
                    need: self.config.min_players,
                });
            }
            return Ok(CreateGameOutcome::Promoted(self.promote(id).await?));
        }

        let game_id = self
            .registry
            .room_game(name)
            .ok_or_else(|| LobbyError::RoomNotFound(name.to_owned()))?;
        let view = self.game_view(game_id).await?;
        if !view.user_ids.contains(user) {
            return Err(GameError::NotAParticipant(user.clone()).into());
        }
        Ok(CreateGameOutcome::Existing(view))
    }

    /// Escrows every member's stake and, if all succeed, replaces the room
    /// with a game.
    pub async fn promote(&self, id: RoomId) -> Result<Promotion, LobbyError> {
        let (name, members, bet_amount, view) = {
            let mut room = self
                .registry
                .rooms
                .get_mut(&id)
                .ok_or_else(|| LobbyError::RoomNotFound(id.to_string()))?;
            if room.state != RoomState::Open {
                return Err(LobbyError::InvalidRoomState {
                    room: room.name.clone(),
                    state: room.state.to_string(),
                });
            }
            if room.members.len() < self.config.min_players {
                return Err(LobbyError::NotEnoughPlayers {
                    room: room.name.clone(),
                    have: room.members.len(),
                    need: self.config.min_players,
                });
            }
            room.state = RoomState::Escrowing;
            room.touch();
            (
                room.name.clone(),
                room.members.clone(),
                room.bet_amount,
                room.view(self.config.max_players),
            )
        };

        info!(room_id = %id, players = members.len(), bet_amount, "escrowing stakes");
        self.sessions.broadcast(
            &members,
            Arc::new(ServerMessage::RoomUpdate {
                room: view,
                reason: RoomUpdateReason::Escrowing,
            }),
        );

        let results = join_all(members.iter().map(|m| self.wallet.debit(m, bet_amount))).await;
        let mut held = Vec::new();
        let mut failed = Vec::new();
        for (member, result) in members.iter().zip(results) {
            match result {
                Ok(_) => held.push(member.clone()),
                Err(err) => failed.push((member.clone(), err)),
            }
        }

        if !failed.is_empty() {
            return Ok(self.abort_escrow(id, bet_amount, held, failed).await);
        }
        self.launch(id, &name, members, bet_amount).await
    }

    async fn abort_escrow(
        &self,
        id: RoomId,
        bet_amount: i64,
        held: Vec<UserId>,
        failed: Vec<(UserId, WalletError)>,
    ) -> Promotion {
        warn!(room_id = %id, failed = failed.len(), "escrow failed, refunding");
        self.refund(&held, bet_amount).await;

        for (member, err) in &failed {
            let (code, kind) = match err {
                WalletError::InsufficientFunds { .. } => (422, "insufficient_funds"),
                WalletError::NotFound(_) => (404, "wallet_not_found"),
                WalletError::InvalidAmount(_) => (422, "invalid_amount"),
                WalletError::Unavailable(_) => (500, "wallet_unavailable"),
            };
            self.sessions.send(
                member,
                Arc::new(ServerMessage::error(code, kind, err.to_string())),
            );
        }
        let evicted: Vec<UserId> = failed.into_iter().map(|(m, _)| m).collect();

        let reopened = self.registry.rooms.get_mut(&id).map(|mut room| {
            for member in &evicted {
                room.remove_member(member);
            }
            room.state = RoomState::Open;
            room.touch();
            (room.members.clone(), room.view(self.config.max_players))
        });
        for member in &evicted {
            self.registry.release_user_room(member, id);
        }

        let Some((remaining, view)) = reopened else {
            return Promotion::Aborted { evicted };
        };
        if remaining.is_empty() {
            self.registry.remove_room(id);
            info!(room_id = %id, "room emptied by escrow failure, closed");
        } else {
            self.sessions.broadcast(
                &remaining,
                Arc::new(ServerMessage::RoomUpdate {
                    room: view,
                    reason: RoomUpdateReason::MemberEvicted,
                }),
            );
        }
        Promotion::Aborted { evicted }
    }

    async fn refund(&self, users: &[UserId], amount: i64) {
        let results = join_all(users.iter().map(|u| self.wallet.credit(u, amount))).await;
        for (user, result) in users.iter().zip(results) {
            if let Err(err) = result {
                error!(%user, amount, error = %err, "stake refund failed");
            }
        }
    }

    async fn launch(
        &self,
        id: RoomId,
        name: &str,
        members: Vec<UserId>,
        bet_amount: i64,
    ) -> Result<Promotion, LobbyError> {
        let game_id = self.registry.next_game_id();
        let pot = bet_amount.saturating_mul(members.len() as i64);
        let game = match Game::new(
            game_id,
            members.clone(),
            self.game_config.rules.clone(),
            pot,
        ) {
            Ok(game) => game,
            Err(err) => {
                self.refund(&members, bet_amount).await;
                if let Some(mut room) = self.registry.rooms.get_mut(&id) {
                    room.state = RoomState::Open;
                }
                return Err(err.into());
            }
        };
        let created = game.view();

        let handle = spawn_session(
            game,
            Arc::clone(&self.registry),
            Arc::clone(&self.sessions),
            Arc::clone(&self.wallet),
            (self.dice)(),
            TurnTimer::new(self.game_config.timer()),
            self.config.command_channel_size,
        );
        self.registry.insert_game(name, handle.clone());
        if !self.config.auto_start {
            self.registry.await_start(game_id, bet_amount, Instant::now());
        }

        if let Some(mut room) = self.registry.rooms.get_mut(&id) {
            room.state = RoomState::Closed;
            room.game_id = Some(game_id);
        }
        let view = self
            .registry
            .remove_room(id)
            .map(|room| room.view(self.config.max_players));
        info!(room_id = %id, %game_id, pot, "room promoted to game");

        if let Some(view) = view {
            self.sessions.broadcast(
                &members,
                Arc::new(ServerMessage::RoomUpdate {
                    room: view,
                    reason: RoomUpdateReason::Promoted,
                }),
            );
        }
        self.sessions.broadcast(
            &members,
            Arc::new(ServerMessage::GameCreated { game: created }),
        );

        if self.config.auto_start {
            handle.start().await?;
        }
        Ok(Promotion::Started { game_id })
    }

    // -- games --------------------------------------------------------------

    pub async fn start_game(&self, user: &UserId, game_id: GameId) -> Result<GameView, LobbyError> {
        let Some(handle) = self.registry.game(game_id) else {
            if self.registry.archived(game_id).is_some() {
                return Err(GameError::IllegalAction(format!("game {game_id} already finished")).into());
            }
            return Err(LobbyError::GameNotFound(game_id));
        };
        if !handle.is_participant(user) {
            return Err(GameError::NotAParticipant(user.clone()).into());
        }
        let view = handle.start().await?;
        self.registry.mark_started(game_id);
        Ok(view)
    }

    /// Routes a player command to its game's session.
    pub async fn play(
        &self,
        user: &UserId,
        game_id: GameId,
        action: Action,
    ) -> Result<Arc<ServerMessage>, LobbyError> {
        let Some(handle) = self.registry.game(game_id) else {
            return Err(self.missing_game(game_id));
        };
        match handle.play(user.clone(), action).await {
            Err(LobbyError::Unavailable(_)) => Err(self.missing_game(game_id)),
            other => other,
        }
    }

    /// A live snapshot, or the archived record of a finished game.
    pub async fn game_view(&self, game_id: GameId) -> Result<GameView, LobbyError> {
        if let Some(handle) = self.registry.game(game_id) {
            match handle.snapshot().await {
                Err(LobbyError::Unavailable(_)) => {}
                other => return other,
            }
        }
        self.registry
            .archived(game_id)
            .ok_or(LobbyError::GameNotFound(game_id))
    }

    pub async fn valid_moves(
        &self,
        user: &UserId,
        game_id: GameId,
    ) -> Result<Vec<MoveView>, LobbyError> {
        if let Some(handle) = self.registry.game(game_id) {
            match handle.valid_moves(user.clone()).await {
                Err(LobbyError::Unavailable(_)) => {}
                other => return other,
            }
        }
        let view = self
            .registry
            .archived(game_id)
            .ok_or(LobbyError::GameNotFound(game_id))?;
        if !view.user_ids.contains(user) {
            return Err(GameError::NotAParticipant(user.clone()).into());
        }
        Ok(Vec::new())
    }

    /// The live game `user` is in, for resuming after a reconnect.
    pub async fn current_game(&self, user: &UserId) -> Option<GameView> {
        let game_id = self.registry.user_game(user)?;
        self.game_view(game_id).await.ok()
    }

    fn missing_game(&self, game_id: GameId) -> LobbyError {
        if self.registry.archived(game_id).is_some() {
            GameError::OutOfTurn("game is over".into()).into()
        } else {
            LobbyError::GameNotFound(game_id)
        }
    }

    // -- maintenance --------------------------------------------------------

    /// Closes open rooms that have been idle too long, cancels promoted
    /// games nobody started in as long, and tells the players. Returns how
    /// many rooms and games were closed.
    pub async fn sweep_idle(&self, now: Instant) -> usize {
        let swept = self
            .registry
            .sweep_idle(now, self.config.idle_room_timeout());
        for mut room in swept.iter().cloned() {
            room.state = RoomState::Closed;
            self.sessions.broadcast(
                &room.members,
                Arc::new(ServerMessage::RoomUpdate {
                    room: room.view(self.config.max_players),
                    reason: RoomUpdateReason::Expired,
                }),
            );
        }
        swept.len() + self.cancel_unstarted(now).await
    }

    /// Stops each stale unstarted game and refunds its stakes. A game that
    /// started in the meantime is left alone.
    async fn cancel_unstarted(&self, now: Instant) -> usize {
        let stale = self
            .registry
            .stale_unstarted(now, self.config.idle_room_timeout());
        let mut cancelled = 0;
        for (game_id, stake) in stale {
            let Some(handle) = self.registry.game(game_id) else {
                self.registry.mark_started(game_id);
                continue;
            };
            let view = match handle.cancel().await {
                Ok(view) => view,
                Err(LobbyError::Game(err)) => {
                    debug!(%game_id, error = %err, "game started before it could be swept");
                    self.registry.mark_started(game_id);
                    continue;
                }
                Err(err) => {
                    warn!(%game_id, error = %err, "session gone, dropping unstarted game");
                    self.registry.drop_game(game_id);
                    continue;
                }
            };
            self.registry.drop_game(game_id);

            let players = handle.participants().to_vec();
            self.sessions.broadcast(
                &players,
                Arc::new(ServerMessage::GameCancelled {
                    game_id,
                    refunded: stake,
                    game: view,
                }),
            );
            let results = join_all(players.iter().map(|u| self.wallet.credit(u, stake))).await;
            for (user, result) in players.iter().zip(results) {
                match result {
                    Ok(balance) => {
                        self.sessions
                            .send(user, Arc::new(ServerMessage::WalletUpdate { balance }));
                    }
                    Err(err) => error!(%game_id, %user, stake, error = %err, "stake refund failed"),
                }
            }
            info!(%game_id, stake, "idle unstarted game cancelled");
            cancelled += 1;
        }
        cancelled
    }
}
