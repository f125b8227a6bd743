//! Serializable snapshots sent to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::board::{Board, Color, Phase};
use crate::engine::Move;
use crate::game::{Game, GameState, Settlement};
use crate::ids::{GameId, UserId};
use crate::position::Position;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PawnView {
    pub id: u8,
    pub player_id: usize,
    pub color: Color,
    pub position: i16,
    pub is_finished: bool,
    pub is_in_safe_zone: bool,
    pub is_in_barracks: bool,
    pub is_in_home_track: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub user_id: UserId,
    pub id: usize,
    pub color: Color,
    pub start_position: u8,
    pub eligible: bool,
    pub pawns: Vec<PawnView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceView {
    pub value: Option<u8>,
    pub can_roll: bool,
    pub repeated_rolls: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardView {
    pub dice: DiceView,
    pub players: Vec<PlayerView>,
    pub current_player_id: usize,
    pub state: Phase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameView {
    pub game_id: GameId,
    pub user_ids: Vec<UserId>,
    pub board: BoardView,
    pub state: GameState,
    pub winner_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pot: i64,
    pub settlement: Option<Settlement>,
}

/// One row of a `valid_moves` answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveView {
    pub pawn_id: u8,
    pub from_position: i16,
    pub to_position: Option<i16>,
    pub can_move: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MoveView {
    pub fn of(seat: usize, mv: &Move) -> Self {
        Self {
            pawn_id: mv.pawn_id,
            from_position: mv.from.encode(seat),
            to_position: mv.to.map(|to| to.encode(seat)),
            can_move: mv.can_move(),
            reason: mv.blocked.map(|b| b.to_string()),
        }
    }
}

impl BoardView {
    pub fn of(board: &Board) -> Self {
        let players = board
            .players
            .iter()
            .map(|player| PlayerView {
                user_id: player.user_id.clone(),
                id: player.seat,
                color: player.color,
                start_position: player.start_cell,
                eligible: player.eligible,
                pawns: player
                    .pawns
                    .iter()
                    .map(|pawn| PawnView {
                        id: pawn.id,
                        player_id: player.seat,
                        color: player.color,
                        position: pawn.position.encode(player.seat),
                        is_finished: pawn.is_finished(),
                        is_in_safe_zone: pawn.position.is_safe(),
                        is_in_barracks: pawn.position == Position::Barracks,
                        is_in_home_track: pawn.position.is_home_stretch(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            dice: DiceView {
                value: board.dice.value,
                can_roll: board.dice.can_roll,
                repeated_rolls: board.dice.consecutive_sixes,
            },
            players,
            current_player_id: board.current,
            state: board.phase,
        }
    }
}

impl GameView {
    pub fn of(game: &Game) -> Self {
        Self {
            game_id: game.id(),
            user_ids: game.user_ids().to_vec(),
            board: BoardView::of(game.board()),
            state: game.state(),
            winner_id: game.winner().cloned(),
            created_at: game.created_at(),
            completed_at: game.completed_at(),
            pot: game.pot(),
            settlement: game.settlement().cloned(),
        }
    }
}
