//! Unified error type for the Ludo server.

use ludo_board::{GameError, UserId};
use ludo_protocol::ProtocolError;
use ludo_room::LobbyError;
use ludo_session::SessionError;
use ludo_transport::TransportError;
use ludo_wallet::WalletError;

/// Top-level error wrapping every crate-specific error.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically. Every
/// variant maps to an `error` event through [`status_code`](Self::status_code)
/// and [`kind`](Self::kind).
#[derive(Debug, thiserror::Error)]
pub enum LudoError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Lobby(#[from] LobbyError),

    #[error(transparent)]
    Game(#[from] GameError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// A command's `user_id` names someone other than the connection's
    /// authenticated user.
    #[error("command names {claimed} but connection is authenticated as {actual}")]
    IdentityMismatch { claimed: UserId, actual: UserId },

    #[error("unsupported protocol version {got}, expected {expected}")]
    VersionMismatch { expected: u32, got: u32 },

    #[error("configuration error: {0}")]
    Config(String),
}

impl LudoError {
    /// HTTP-style status carried by the `error` event.
    pub fn status_code(&self) -> u16 {
        self.classify().0
    }

    /// Machine-readable error name carried by the `error` event.
    pub fn kind(&self) -> &'static str {
        self.classify().1
    }

    /// Whether this is a server fault rather than a rejected request.
    pub fn is_internal(&self) -> bool {
        self.status_code() >= 500
    }

    fn classify(&self) -> (u16, &'static str) {
        match self {
            Self::Protocol(ProtocolError::InvalidMessage(_)) => (400, "invalid_message"),
            Self::Protocol(_) => (400, "malformed"),
            Self::VersionMismatch { .. } => (400, "version_mismatch"),
            Self::Session(SessionError::AuthFailed(_)) => (401, "unauthorized"),
            Self::IdentityMismatch { .. } => (403, "identity_mismatch"),
            Self::Game(err) => classify_game(err),
            Self::Wallet(err) => classify_wallet(err),
            Self::Lobby(err) => classify_lobby(err),
            Self::Transport(_) | Self::Config(_) => (500, "internal"),
        }
    }
}

fn classify_game(err: &GameError) -> (u16, &'static str) {
    match err {
        GameError::NotAParticipant(_) => (403, "not_a_participant"),
        GameError::OutOfTurn(_) => (409, "out_of_turn"),
        GameError::IllegalAction(_) => (422, "illegal_action"),
        GameError::IllegalMove { .. } => (422, "illegal_move"),
        GameError::InvalidPlayerCount(_)
        | GameError::DuplicateParticipant(_)
        | GameError::InvalidDiceValue(_) => (500, "internal"),
    }
}

fn classify_wallet(err: &WalletError) -> (u16, &'static str) {
    match err {
        WalletError::InsufficientFunds { .. } => (422, "insufficient_funds"),
        WalletError::InvalidAmount(_) => (422, "invalid_amount"),
        WalletError::NotFound(_) => (404, "wallet_not_found"),
        WalletError::Unavailable(_) => (500, "wallet_unavailable"),
    }
}

fn classify_lobby(err: &LobbyError) -> (u16, &'static str) {
    match err {
        LobbyError::Game(err) => classify_game(err),
        LobbyError::Wallet(err) => classify_wallet(err),
        LobbyError::RoomNotFound(_) => (404, "room_not_found"),
        // Unknown, cancelled and stale game ids all read as a missing session.
        LobbyError::GameNotFound(_) => (404, "session_not_found"),
        LobbyError::NotRoomMember { .. } => (403, "not_room_member"),
        LobbyError::NotRoomCreator(_) => (403, "not_room_creator"),
        LobbyError::RoomNameTaken(_) => (409, "room_name_taken"),
        LobbyError::RoomFull(_) => (409, "room_full"),
        LobbyError::AlreadyJoined { .. } => (409, "already_joined"),
        LobbyError::AlreadyInRoom(_) => (409, "already_in_room"),
        LobbyError::InvalidRoomState { .. } => (409, "invalid_room_state"),
        LobbyError::InvalidRoomName => (422, "invalid_room_name"),
        LobbyError::InvalidStake(_) => (422, "invalid_stake"),
        LobbyError::NotEnoughPlayers { .. } => (422, "not_enough_players"),
        LobbyError::Unavailable(_) => (500, "game_unavailable"),
    }
}
