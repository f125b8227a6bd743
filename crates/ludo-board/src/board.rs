//! Board state: players, pawns, dice and the phase tag.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GameError;
use crate::ids::UserId;
use crate::position::{Position, MAX_SEATS, PAWNS_PER_PLAYER, START_CELLS};

/// Seat colors, assigned by seat index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Red,
    Green,
    Blue,
    Yellow,
}

impl Color {
    const BY_SEAT: [Color; MAX_SEATS] = [Color::Red, Color::Green, Color::Blue, Color::Yellow];

    pub fn for_seat(seat: usize) -> Self {
        Self::BY_SEAT[seat % MAX_SEATS]
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Red => "red",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Yellow => "yellow",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pawn {
    pub id: u8,
    pub position: Position,
}

impl Pawn {
    pub fn is_finished(&self) -> bool {
        self.position == Position::Finished
    }

    /// On the ring or in the home stretch.
    pub fn is_active(&self) -> bool {
        matches!(self.position, Position::Track(_) | Position::HomeStretch(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub user_id: UserId,
    pub seat: usize,
    pub color: Color,
    pub start_cell: u8,
    pub pawns: [Pawn; PAWNS_PER_PLAYER],
    /// Cleared by forfeit. Ineligible players are skipped forever.
    pub eligible: bool,
    /// Consecutive turns lost to the turn timer.
    pub missed_turns: u32,
}

impl Player {
    fn new(user_id: UserId, seat: usize) -> Self {
        let pawns = std::array::from_fn(|i| Pawn {
            id: i as u8,
            position: Position::Barracks,
        });
        Self {
            user_id,
            seat,
            color: Color::for_seat(seat),
            start_cell: START_CELLS[seat],
            pawns,
            eligible: true,
            missed_turns: 0,
        }
    }

    pub fn finished_pawns(&self) -> usize {
        self.pawns.iter().filter(|p| p.is_finished()).count()
    }

    pub fn has_won(&self) -> bool {
        self.finished_pawns() == PAWNS_PER_PLAYER
    }

    /// Whether this player still takes turns.
    pub fn in_rotation(&self) -> bool {
        self.eligible && !self.has_won()
    }

    pub fn pawn(&self, pawn_id: u8) -> Option<&Pawn> {
        self.pawns.get(usize::from(pawn_id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dice {
    /// Last rolled value; `Some` only while it waits to be consumed by a move.
    pub value: Option<u8>,
    pub can_roll: bool,
    pub consecutive_sixes: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "waiting_for_dice_roll")]
    AwaitingRoll,
    #[serde(rename = "waiting_for_pawn_move")]
    AwaitingMove,
    #[serde(rename = "finished")]
    Finished,
}

/// Full state of one game board.
///
/// Fields are public for reading; the engine is the only code that builds
/// modified boards, always from a clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub dice: Dice,
    pub players: Vec<Player>,
    pub current: usize,
    pub phase: Phase,
}

impl Board {
    /// A fresh idle board, seats assigned in the order given.
    pub fn new(user_ids: &[UserId]) -> Result<Self, GameError> {
        if !(2..=MAX_SEATS).contains(&user_ids.len()) {
            return Err(GameError::InvalidPlayerCount(user_ids.len()));
        }
        let mut seen = HashSet::new();
        for user in user_ids {
            if !seen.insert(user) {
                return Err(GameError::DuplicateParticipant(user.clone()));
            }
        }

        let players = user_ids
            .iter()
            .enumerate()
            .map(|(seat, user)| Player::new(user.clone(), seat))
            .collect();

        Ok(Self {
            dice: Dice::default(),
            players,
            current: 0,
            phase: Phase::Idle,
        })
    }

    pub fn seat_of(&self, user: &UserId) -> Option<usize> {
        self.players.iter().position(|p| &p.user_id == user)
    }

    pub fn current_player(&self) -> &Player {
        &self.players[self.current]
    }

    /// Moves to `phase`, keeping the dice roll permission consistent with it.
    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.dice.can_roll = phase == Phase::AwaitingRoll;
        if phase != Phase::AwaitingMove {
            self.dice.value = None;
        }
    }

    /// The next seat after `from` that is still in rotation, wrapping around.
    /// Returns `from` itself when it is the only one left.
    pub fn next_seat_after(&self, from: usize) -> Option<usize> {
        let n = self.players.len();
        (1..=n)
            .map(|step| (from + step) % n)
            .find(|&seat| self.players[seat].in_rotation())
    }

    pub fn players_in_rotation(&self) -> usize {
        self.players.iter().filter(|p| p.in_rotation()).count()
    }

    /// Pawns of seats other than `seat` standing on ring cell `cell`.
    pub(crate) fn opponents_on(&self, seat: usize, cell: u8) -> Vec<(usize, u8)> {
        self.players
            .iter()
            .filter(|p| p.seat != seat)
            .flat_map(|p| {
                p.pawns
                    .iter()
                    .filter(move |pawn| pawn.position == Position::Track(cell))
                    .map(move |pawn| (p.seat, pawn.id))
            })
            .collect()
    }

    /// Whether an opposing color holds a block (two or more pawns) on `cell`.
    pub(crate) fn blocked_for(&self, seat: usize, cell: u8) -> bool {
        self.players.iter().filter(|p| p.seat != seat).any(|p| {
            p.pawns
                .iter()
                .filter(|pawn| pawn.position == Position::Track(cell))
                .count()
                >= 2
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(n: usize) -> Vec<UserId> {
        (0..n).map(|i| UserId::new(format!("u{i}"))).collect()
    }

    #[test]
    fn test_new_board_seats_in_order_with_pawns_in_barracks() {
        let board = Board::new(&users(4)).unwrap();
        assert_eq!(board.phase, Phase::Idle);
        for (seat, player) in board.players.iter().enumerate() {
            assert_eq!(player.seat, seat);
            assert_eq!(player.start_cell, START_CELLS[seat]);
            assert!(player.pawns.iter().all(|p| p.position == Position::Barracks));
        }
        assert_eq!(board.players[2].color, Color::Blue);
    }

    #[test]
    fn test_new_board_rejects_bad_player_counts() {
        assert!(matches!(
            Board::new(&users(1)),
            Err(GameError::InvalidPlayerCount(1))
        ));
        assert!(matches!(
            Board::new(&users(5)),
            Err(GameError::InvalidPlayerCount(5))
        ));
    }

    #[test]
    fn test_new_board_rejects_duplicate_users() {
        let ids = vec![UserId::new("a"), UserId::new("a")];
        assert!(matches!(
            Board::new(&ids),
            Err(GameError::DuplicateParticipant(_))
        ));
    }

    #[test]
    fn test_next_seat_skips_ineligible_players() {
        let mut board = Board::new(&users(4)).unwrap();
        board.players[1].eligible = false;
        assert_eq!(board.next_seat_after(0), Some(2));
        assert_eq!(board.next_seat_after(3), Some(0));

        board.players[2].eligible = false;
        board.players[3].eligible = false;
        assert_eq!(board.next_seat_after(0), Some(0));
    }

    #[test]
    fn test_set_phase_keeps_dice_consistent() {
        let mut board = Board::new(&users(2)).unwrap();
        board.set_phase(Phase::AwaitingRoll);
        assert!(board.dice.can_roll);
        board.dice.value = Some(3);
        board.set_phase(Phase::AwaitingMove);
        assert!(!board.dice.can_roll);
        assert_eq!(board.dice.value, Some(3));
        board.set_phase(Phase::AwaitingRoll);
        assert_eq!(board.dice.value, None);
    }
}
