//! Game session actor: one Tokio task per live game.
//!
//! The task owns the [`Game`] and is the only place it is mutated.
//! Commands arrive on a bounded queue and are applied one at a time, in
//! arrival order, so concurrent requests for the same game are totally
//! ordered. The turn timer is polled next to the queue.
//!
//! Every accepted command is broadcast to all participants, the caller
//! included, before the caller's reply is sent. Rejections go back only
//! to the caller.

use std::sync::Arc;

use ludo_board::{
    Action, DiceRoller, Game, GameError, GameEvent, GameId, GameState, GameView, MoveView,
    Settlement, SkipReason, UserId,
};
use ludo_protocol::{CapturedPawn, ServerMessage};
use ludo_session::SessionManager;
use ludo_timer::TurnTimer;
use ludo_wallet::{Wallet, WalletError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::{LobbyError, SessionRegistry};

pub(crate) enum SessionCommand {
    Start {
        reply: oneshot::Sender<Result<GameView, GameError>>,
    },
    Play {
        user: UserId,
        action: Action,
        reply: oneshot::Sender<Result<Arc<ServerMessage>, GameError>>,
    },
    Snapshot {
        reply: oneshot::Sender<GameView>,
    },
    ValidMoves {
        user: UserId,
        reply: oneshot::Sender<Result<Vec<MoveView>, GameError>>,
    },
    /// The payout task finished.
    Settled {
        result: Result<i64, WalletError>,
    },
    /// Abandons a game nobody started. Refused once it is under way.
    Cancel {
        reply: oneshot::Sender<Result<GameView, GameError>>,
    },
}

/// Handle to a running game session. Cheap to clone.
#[derive(Clone)]
pub struct GameHandle {
    game_id: GameId,
    participants: Arc<[UserId]>,
    sender: mpsc::Sender<SessionCommand>,
}

impl GameHandle {
    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    /// Seat order.
    pub fn participants(&self) -> &[UserId] {
        &self.participants
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, LobbyError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| LobbyError::Unavailable(self.game_id))?;
        reply_rx
            .await
            .map_err(|_| LobbyError::Unavailable(self.game_id))
    }

    pub async fn start(&self) -> Result<GameView, LobbyError> {
        Ok(self.request(|reply| SessionCommand::Start { reply }).await??)
    }

    /// Applies a player command. The returned message is the one every
    /// participant was sent for it.
    pub async fn play(&self, user: UserId, action: Action) -> Result<Arc<ServerMessage>, LobbyError> {
        Ok(self
            .request(|reply| SessionCommand::Play {
                user,
                action,
                reply,
            })
            .await??)
    }

    pub async fn snapshot(&self) -> Result<GameView, LobbyError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    pub async fn valid_moves(&self, user: UserId) -> Result<Vec<MoveView>, LobbyError> {
        Ok(self
            .request(|reply| SessionCommand::ValidMoves { user, reply })
            .await??)
    }

    /// Stops the session if the game has not started. The returned view
    /// is the game as it was abandoned.
    pub async fn cancel(&self) -> Result<GameView, LobbyError> {
        Ok(self.request(|reply| SessionCommand::Cancel { reply }).await??)
    }
}

/// Spawns the session task for `game` and returns its handle.
pub fn spawn_session<W: Wallet>(
    game: Game,
    registry: Arc<SessionRegistry>,
    sessions: Arc<SessionManager>,
    wallet: Arc<W>,
    dice: Box<dyn DiceRoller + Send>,
    timer: TurnTimer,
    channel_size: usize,
) -> GameHandle {
    let (tx, rx) = mpsc::channel(channel_size.max(1));
    let handle = GameHandle {
        game_id: game.id(),
        participants: game.user_ids().into(),
        sender: tx.clone(),
    };
    let actor = SessionActor {
        game,
        registry,
        sessions,
        wallet,
        dice,
        timer,
        receiver: rx,
        loopback: tx.downgrade(),
        payout_started: false,
        settled: false,
    };
    tokio::spawn(actor.run());
    handle
}

struct SessionActor<W: Wallet> {
    game: Game,
    registry: Arc<SessionRegistry>,
    sessions: Arc<SessionManager>,
    wallet: Arc<W>,
    dice: Box<dyn DiceRoller + Send>,
    timer: TurnTimer,
    receiver: mpsc::Receiver<SessionCommand>,
    /// Lets the payout task report back without keeping the session alive.
    loopback: mpsc::WeakSender<SessionCommand>,
    payout_started: bool,
    settled: bool,
}

impl<W: Wallet> SessionActor<W> {
    async fn run(mut self) {
        let game_id = self.game.id();
        info!(%game_id, players = self.game.user_ids().len(), "game session started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle(cmd) {
                        break;
                    }
                }
                expiry = self.timer.expired() => {
                    debug!(%game_id, turn = expiry.turn, late_ms = expiry.late_by.as_millis() as u64, "turn deadline passed");
                    self.on_timeout();
                    if self.settled {
                        break;
                    }
                }
            }
        }

        info!(%game_id, "game session stopped");
    }

    /// Returns `false` when the session should stop.
    fn handle(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Start { reply } => {
                let result = self.start();
                let _ = reply.send(result);
            }
            SessionCommand::Play { user, action, reply } => {
                if reply.is_closed() {
                    debug!(game_id = %self.game.id(), %user, ?action, "caller went away, command skipped");
                    return true;
                }
                let result = self.play(&user, action);
                let _ = reply.send(result);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.game.view());
            }
            SessionCommand::ValidMoves { user, reply } => {
                let result = self.valid_moves(&user);
                let _ = reply.send(result);
            }
            SessionCommand::Settled { result } => self.settle(result),
            SessionCommand::Cancel { reply } => {
                if self.game.state() != GameState::NotStarted {
                    let _ = reply.send(Err(GameError::IllegalAction(format!(
                        "game {} already started",
                        self.game.id()
                    ))));
                    return true;
                }
                info!(game_id = %self.game.id(), "unstarted game cancelled");
                let _ = reply.send(Ok(self.game.view()));
                return false;
            }
        }
        !self.settled
    }

    fn start(&mut self) -> Result<GameView, GameError> {
        self.game.start()?;
        self.timer.arm();
        let view = self.game.view();
        self.broadcast(ServerMessage::GameStarted { game: view.clone() });
        Ok(view)
    }

    fn play(&mut self, user: &UserId, action: Action) -> Result<Arc<ServerMessage>, GameError> {
        let events = match self.game.apply(user, action, self.dice.as_mut()) {
            Ok(events) => events,
            Err(err) => {
                debug!(game_id = %self.game.id(), %user, ?action, error = %err, "command rejected");
                return Err(err);
            }
        };

        let primary = Arc::new(self.describe(user, action, &events));
        self.sessions
            .broadcast(self.game.user_ids(), Arc::clone(&primary));
        self.after_transition(&events);
        Ok(primary)
    }

    fn valid_moves(&self, user: &UserId) -> Result<Vec<MoveView>, GameError> {
        let seat = self
            .game
            .board()
            .seat_of(user)
            .ok_or_else(|| GameError::NotAParticipant(user.clone()))?;
        Ok(self
            .game
            .valid_moves(user)?
            .iter()
            .map(|mv| MoveView::of(seat, mv))
            .collect())
    }

    fn on_timeout(&mut self) {
        let Some(user) = self.game.current_user().cloned() else {
            return;
        };
        let events = match self.game.timeout() {
            Ok(events) => events,
            Err(err) => {
                error!(game_id = %self.game.id(), error = %err, "timeout could not be applied");
                return;
            }
        };
        if events.is_empty() {
            return;
        }
        info!(game_id = %self.game.id(), %user, "turn timed out");

        let game_id = self.game.id();
        self.broadcast(ServerMessage::TurnSkipped {
            game_id,
            user_id: user.clone(),
            reason: SkipReason::Timeout,
            next_player: self.game.current_user().cloned(),
            game: self.game.view(),
        });
        if events
            .iter()
            .any(|e| matches!(e, GameEvent::PlayerForfeited { .. }))
        {
            self.broadcast(ServerMessage::PlayerForfeited {
                game_id,
                user_id: user,
                game: self.game.view(),
            });
        }
        self.after_transition(&events);
    }

    /// Re-arms the clock while play continues; announces the winner and
    /// starts the payout once the game ends.
    fn after_transition(&mut self, events: &[GameEvent]) {
        if !self.game.is_finished() {
            self.timer.arm();
            return;
        }
        self.timer.disarm();
        if !events.iter().any(GameEvent::is_terminal) {
            return;
        }
        let Some(winner) = self.game.winner().cloned() else {
            return;
        };
        self.broadcast(ServerMessage::GameFinished {
            game_id: self.game.id(),
            winner_id: winner.clone(),
            prize_amount: self.game.pot(),
            game: self.game.view(),
        });
        self.start_payout(winner);
    }

    fn start_payout(&mut self, winner: UserId) {
        if self.payout_started {
            return;
        }
        self.payout_started = true;

        let pot = self.game.pot();
        if pot <= 0 {
            self.settle(Ok(0));
            return;
        }

        let wallet = Arc::clone(&self.wallet);
        let loopback = self.loopback.upgrade();
        let game_id = self.game.id();
        tokio::spawn(async move {
            let result = wallet.credit(&winner, pot).await;
            match loopback {
                Some(tx) => {
                    let _ = tx.send(SessionCommand::Settled { result }).await;
                }
                None => warn!(%game_id, ?result, "game session gone before payout settled"),
            }
        });
    }

    fn settle(&mut self, result: Result<i64, WalletError>) {
        let game_id = self.game.id();
        let pot = self.game.pot();
        match result {
            Ok(balance) => {
                info!(%game_id, pot, "pot paid out");
                self.game.record_settlement(Settlement::Paid { amount: pot });
                if pot > 0 {
                    if let Some(winner) = self.game.winner() {
                        self.sessions
                            .send(winner, Arc::new(ServerMessage::WalletUpdate { balance }));
                    }
                }
            }
            Err(err) => {
                error!(%game_id, pot, error = %err, "payout failed");
                self.game.record_settlement(Settlement::Failed {
                    reason: err.to_string(),
                });
            }
        }
        self.registry.archive(self.game.clone());
        self.settled = true;
    }

    fn broadcast(&self, message: ServerMessage) {
        self.sessions
            .broadcast(self.game.user_ids(), Arc::new(message));
    }

    /// The message announcing `action`'s outcome.
    fn describe(&self, user: &UserId, action: Action, events: &[GameEvent]) -> ServerMessage {
        let game_id = self.game.id();
        let next_player = self.game.current_user().cloned();
        let game = self.game.view();
        let user_id = user.clone();

        match action {
            Action::Roll => {
                let dice_value = events
                    .iter()
                    .find_map(|e| match e {
                        GameEvent::DiceRolled { value, .. } => Some(*value),
                        _ => None,
                    })
                    .unwrap_or_default();
                ServerMessage::DiceRolled {
                    game_id,
                    user_id,
                    dice_value,
                    next_player,
                    events: events.to_vec(),
                    game,
                }
            }
            Action::Move { pawn_id } => {
                let (from_position, to_position) = events
                    .iter()
                    .find_map(|e| match e {
                        GameEvent::PawnMoved { from, to, .. } => Some((*from, *to)),
                        _ => None,
                    })
                    .unwrap_or_default();
                let captured = events
                    .iter()
                    .filter_map(|e| match e {
                        GameEvent::Capture {
                            victim_seat,
                            victim_pawn_id,
                            ..
                        } => Some(CapturedPawn {
                            user_id: self.game.board().players[*victim_seat].user_id.clone(),
                            pawn_id: *victim_pawn_id,
                        }),
                        _ => None,
                    })
                    .collect();
                ServerMessage::PawnMoved {
                    game_id,
                    user_id,
                    pawn_id,
                    from_position,
                    to_position,
                    captured,
                    next_player,
                    events: events.to_vec(),
                    game,
                }
            }
            Action::Skip => ServerMessage::TurnSkipped {
                game_id,
                user_id,
                reason: SkipReason::Voluntary,
                next_player,
                game,
            },
            Action::Forfeit => ServerMessage::PlayerForfeited {
                game_id,
                user_id,
                game,
            },
        }
    }
}
