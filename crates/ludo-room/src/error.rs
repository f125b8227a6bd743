use ludo_board::{GameError, GameId, UserId};
use ludo_wallet::WalletError;

/// Errors from lobby, registry and game session operations.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("room '{0}' not found")]
    RoomNotFound(String),

    #[error("game {0} not found")]
    GameNotFound(GameId),

    #[error("room name '{0}' is already in use")]
    RoomNameTaken(String),

    #[error("room name must not be empty")]
    InvalidRoomName,

    #[error("stake must be positive, got {0}")]
    InvalidStake(i64),

    #[error("room '{0}' is full")]
    RoomFull(String),

    #[error("{user} already joined room '{room}'")]
    AlreadyJoined { user: UserId, room: String },

    #[error("{0} is already in another room or game")]
    AlreadyInRoom(UserId),

    #[error("{user} is not a member of room '{room}'")]
    NotRoomMember { user: UserId, room: String },

    #[error("only the creator of room '{0}' can do that")]
    NotRoomCreator(String),

    #[error("room '{room}' has {have} players, needs {need}")]
    NotEnoughPlayers { room: String, have: usize, need: usize },

    #[error("room '{room}' is {state}")]
    InvalidRoomState { room: String, state: String },

    /// The game's session actor has stopped.
    #[error("game {0} is unavailable")]
    Unavailable(GameId),

    #[error(transparent)]
    Game(#[from] GameError),

    #[error(transparent)]
    Wallet(#[from] WalletError),
}
