use crate::ids::UserId;

/// Errors raised by board transitions and the turn machine.
///
/// Every variant leaves the board exactly as it was before the command.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("user {0} is not a participant of this game")]
    NotAParticipant(UserId),

    #[error("out of turn: {0}")]
    OutOfTurn(String),

    #[error("illegal action: {0}")]
    IllegalAction(String),

    #[error("illegal move for pawn {pawn_id}: {reason}")]
    IllegalMove { pawn_id: u8, reason: String },

    #[error("a game needs 2 to 4 players, got {0}")]
    InvalidPlayerCount(usize),

    #[error("user {0} appears more than once")]
    DuplicateParticipant(UserId),

    #[error("dice produced {0}, expected 1..=6")]
    InvalidDiceValue(u8),
}
