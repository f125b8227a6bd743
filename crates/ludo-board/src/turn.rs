//! Turn state machine.
//!
//! ```text
//! idle ─begin─▶ awaiting_roll ─roll─▶ awaiting_move ─move─▶ awaiting_roll (next seat)
//!                  ▲    │                                 │
//!                  │    └─ no moves / too many sixes ─────┤
//!                  └──────────── bonus roll ──────────────┘
//! ```
//!
//! The engine checks board legality; this layer maps users to seats and
//! decides whether a command is the one the game is waiting for.

use tracing::debug;

use crate::board::{Board, Phase};
use crate::dice::DiceRoller;
use crate::engine::{self, Move};
use crate::error::GameError;
use crate::event::{GameEvent, SkipReason};
use crate::ids::UserId;
use crate::rules::RuleSet;

/// A player command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Roll,
    Move { pawn_id: u8 },
    Skip,
    Forfeit,
}

#[derive(Debug, Clone)]
pub struct TurnMachine {
    board: Board,
    rules: RuleSet,
}

impl TurnMachine {
    pub fn new(user_ids: &[UserId], rules: RuleSet) -> Result<Self, GameError> {
        Ok(Self {
            board: Board::new(user_ids)?,
            rules,
        })
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn begin(&mut self) -> Result<Vec<GameEvent>, GameError> {
        let (next, events) = engine::start(&self.board)?;
        self.board = next;
        Ok(events)
    }

    /// Applies `action` on behalf of `user`. The board is replaced only
    /// when the whole transition succeeds.
    pub fn apply(
        &mut self,
        user: &UserId,
        action: Action,
        dice: &mut dyn DiceRoller,
    ) -> Result<Vec<GameEvent>, GameError> {
        let seat = self
            .board
            .seat_of(user)
            .ok_or_else(|| GameError::NotAParticipant(user.clone()))?;

        match self.board.phase {
            Phase::Idle => return Err(GameError::OutOfTurn("game has not started".into())),
            Phase::Finished => return Err(GameError::OutOfTurn("game is over".into())),
            Phase::AwaitingRoll | Phase::AwaitingMove => {}
        }
        if !self.board.players[seat].eligible {
            return Err(GameError::OutOfTurn(format!("{user} has forfeited")));
        }
        if action != Action::Forfeit && seat != self.board.current {
            return Err(GameError::OutOfTurn(format!(
                "it is {}'s turn",
                self.board.current_player().user_id
            )));
        }

        let (mut next, events) = match action {
            Action::Roll => {
                if self.board.phase != Phase::AwaitingRoll {
                    return Err(GameError::OutOfTurn("expected a pawn move".into()));
                }
                let (next, outcome) =
                    engine::roll_dice(&self.board, seat, &self.rules, dice)?;
                (next, outcome.events)
            }
            Action::Move { pawn_id } => {
                if self.board.phase != Phase::AwaitingMove {
                    return Err(GameError::OutOfTurn("expected a dice roll".into()));
                }
                engine::apply_move(&self.board, seat, pawn_id, &self.rules)?
            }
            Action::Skip => engine::skip_turn(&self.board, seat, SkipReason::Voluntary)?,
            Action::Forfeit => engine::forfeit(&self.board, seat)?,
        };

        next.players[seat].missed_turns = 0;
        debug!(%user, seat, ?action, events = events.len(), "turn action applied");
        self.board = next;
        Ok(events)
    }

    /// The turn timer fired for the current seat.
    ///
    /// Skips the turn, or forfeits the player once they have missed
    /// `rules.forfeit_after_missed_turns` turns in a row. Does nothing
    /// outside of play.
    pub fn timeout(&mut self) -> Result<Vec<GameEvent>, GameError> {
        if !matches!(self.board.phase, Phase::AwaitingRoll | Phase::AwaitingMove) {
            return Ok(Vec::new());
        }
        let seat = self.board.current;
        let missed = self.board.players[seat].missed_turns + 1;
        let limit = self.rules.forfeit_after_missed_turns;

        let (next, events) = if limit > 0 && missed >= limit {
            let (next, mut forfeited) = engine::forfeit(&self.board, seat)?;
            forfeited.insert(
                0,
                GameEvent::TurnSkipped {
                    seat,
                    reason: SkipReason::Timeout,
                },
            );
            (next, forfeited)
        } else {
            let (mut next, events) = engine::skip_turn(&self.board, seat, SkipReason::Timeout)?;
            next.players[seat].missed_turns = missed;
            (next, events)
        };

        debug!(seat, missed, "turn timed out");
        self.board = next;
        Ok(events)
    }

    /// Valid moves for `user`'s pending roll. Empty unless it is their
    /// move.
    pub fn valid_moves(&self, user: &UserId) -> Result<Vec<Move>, GameError> {
        let seat = self
            .board
            .seat_of(user)
            .ok_or_else(|| GameError::NotAParticipant(user.clone()))?;
        match self.board.dice.value {
            Some(value) if seat == self.board.current && self.board.phase == Phase::AwaitingMove => {
                Ok(engine::compute_valid_moves(&self.board, seat, value, &self.rules))
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Seat whose turn it is, while the game is in play.
    pub fn current_seat(&self) -> Option<usize> {
        match self.board.phase {
            Phase::AwaitingRoll | Phase::AwaitingMove => Some(self.board.current),
            Phase::Idle | Phase::Finished => None,
        }
    }
}
