//! Events derived from board transitions.
//!
//! Positions inside events use the wire encoding (see [`crate::position`]),
//! so events can be forwarded to clients as they are.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The roll left no pawn able to move.
    NoValidMoves,
    /// The turn timer fired.
    Timeout,
    /// The player asked to skip.
    Voluntary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    GameStarted {
        first_seat: usize,
    },
    DiceRolled {
        seat: usize,
        value: u8,
    },
    PawnMoved {
        seat: usize,
        pawn_id: u8,
        from: i16,
        to: i16,
    },
    Capture {
        seat: usize,
        pawn_id: u8,
        victim_seat: usize,
        victim_pawn_id: u8,
        cell: u8,
    },
    PawnFinished {
        seat: usize,
        pawn_id: u8,
    },
    BonusRoll {
        seat: usize,
    },
    TurnSkipped {
        seat: usize,
        reason: SkipReason,
    },
    /// Too many consecutive sixes; the roll is discarded and the turn ends.
    TurnForfeited {
        seat: usize,
        consecutive_sixes: u8,
    },
    TurnPassed {
        from: usize,
        to: usize,
    },
    PlayerForfeited {
        seat: usize,
    },
    PlayerWon {
        seat: usize,
    },
}

impl GameEvent {
    /// Whether this event ends the game.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PlayerWon { .. })
    }
}
