//! The game aggregate: lifecycle, winner, pot and settlement around a
//! [`TurnMachine`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::board::Board;
use crate::dice::DiceRoller;
use crate::engine::Move;
use crate::error::GameError;
use crate::event::GameEvent;
use crate::ids::{GameId, UserId};
use crate::rules::RuleSet;
use crate::turn::{Action, TurnMachine};
use crate::view::GameView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    NotStarted,
    InProgress,
    Finished,
}

/// Outcome of paying the pot to the winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Settlement {
    Pending,
    Paid { amount: i64 },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct Game {
    id: GameId,
    user_ids: Vec<UserId>,
    machine: TurnMachine,
    state: GameState,
    winner: Option<UserId>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    pot: i64,
    settlement: Option<Settlement>,
}

impl Game {
    /// Seats are assigned in the order of `user_ids`.
    pub fn new(
        id: GameId,
        user_ids: Vec<UserId>,
        rules: RuleSet,
        pot: i64,
    ) -> Result<Self, GameError> {
        let machine = TurnMachine::new(&user_ids, rules)?;
        Ok(Self {
            id,
            user_ids,
            machine,
            state: GameState::NotStarted,
            winner: None,
            created_at: Utc::now(),
            completed_at: None,
            pot,
            settlement: None,
        })
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn user_ids(&self) -> &[UserId] {
        &self.user_ids
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn board(&self) -> &Board {
        self.machine.board()
    }

    pub fn pot(&self) -> i64 {
        self.pot
    }

    pub fn winner(&self) -> Option<&UserId> {
        self.winner.as_ref()
    }

    pub fn settlement(&self) -> Option<&Settlement> {
        self.settlement.as_ref()
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.user_ids.contains(user)
    }

    pub fn is_finished(&self) -> bool {
        self.state == GameState::Finished
    }

    /// The user whose turn it is while the game is in progress.
    pub fn current_user(&self) -> Option<&UserId> {
        self.machine
            .current_seat()
            .map(|seat| &self.machine.board().players[seat].user_id)
    }

    pub fn start(&mut self) -> Result<Vec<GameEvent>, GameError> {
        if self.state != GameState::NotStarted {
            return Err(GameError::IllegalAction(format!("game {} already started", self.id)));
        }
        let events = self.machine.begin()?;
        self.state = GameState::InProgress;
        info!(game_id = %self.id, players = self.user_ids.len(), "game started");
        Ok(events)
    }

    pub fn apply(
        &mut self,
        user: &UserId,
        action: Action,
        dice: &mut dyn DiceRoller,
    ) -> Result<Vec<GameEvent>, GameError> {
        let events = self.machine.apply(user, action, dice)?;
        self.observe(&events);
        Ok(events)
    }

    pub fn timeout(&mut self) -> Result<Vec<GameEvent>, GameError> {
        let events = self.machine.timeout()?;
        self.observe(&events);
        Ok(events)
    }

    pub fn valid_moves(&self, user: &UserId) -> Result<Vec<Move>, GameError> {
        self.machine.valid_moves(user)
    }

    pub fn record_settlement(&mut self, settlement: Settlement) {
        self.settlement = Some(settlement);
    }

    pub fn view(&self) -> GameView {
        GameView::of(self)
    }

    pub(crate) fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    fn observe(&mut self, events: &[GameEvent]) {
        let Some(seat) = events.iter().find_map(|e| match e {
            GameEvent::PlayerWon { seat } => Some(*seat),
            _ => None,
        }) else {
            return;
        };
        if self.winner.is_some() {
            return;
        }
        let winner = self.machine.board().players[seat].user_id.clone();
        info!(game_id = %self.id, winner = %winner, pot = self.pot, "game finished");
        self.winner = Some(winner);
        self.state = GameState::Finished;
        self.completed_at = Some(Utc::now());
        self.settlement = Some(Settlement::Pending);
    }
}
