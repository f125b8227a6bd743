//! Message types that travel on the wire.
//!
//! Client and server messages are adjacently tagged: the variant name goes
//! in `event` (snake_case) and its fields in `payload`.

use std::fmt;

use ludo_board::{BoardView, GameEvent, GameId, GameView, MoveView, SkipReason, UserId};
use serde::{Deserialize, Serialize};

/// Version a client must announce in its handshake.
pub const PROTOCOL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Unique identifier of a room. Serialized as a plain number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Outer frame around every message.
///
/// `seq` is assigned per connection by the sender and increases by one per
/// frame. `timestamp` is milliseconds since the Unix epoch. Clients may
/// leave both out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<M> {
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub timestamp: u64,
    pub message: M,
}

impl<M> Envelope<M> {
    pub fn new(seq: u64, timestamp: u64, message: M) -> Self {
        Self {
            seq,
            timestamp,
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

/// Lifecycle of a pre-game room.
///
/// ```text
/// Open ──(full / early start)──▶ Escrowing ──(all stakes held)──▶ Closed
///   ▲                                │
///   └─────────(escrow failed)────────┘
/// ```
///
/// A room is also `Closed` when its creator leaves or it idles out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Open,
    Escrowing,
    Closed,
}

impl RoomState {
    /// Whether new members may join in this state.
    pub fn is_joinable(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Escrowing => "escrowing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Snapshot of a room as clients see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomView {
    pub id: RoomId,
    pub name: String,
    pub creator_id: UserId,
    pub users: Vec<UserId>,
    pub bet_amount: i64,
    pub total_bet_amount: i64,
    pub game_id: Option<GameId>,
    pub state: RoomState,
    pub player_count: usize,
    pub max_players: usize,
}

/// Why a `room_update` was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomUpdateReason {
    MemberJoined,
    MemberLeft,
    /// A member's stake could not be escrowed.
    MemberEvicted,
    Escrowing,
    Promoted,
    Closed,
    Expired,
}

/// A pawn sent back to the barracks by a move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedPawn {
    pub user_id: UserId,
    pub pawn_id: u8,
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Commands a client can send.
///
/// The optional `user_id` on game commands exists for clients that echo
/// their identity; the server rejects it when it differs from the
/// authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first message on a connection.
    Handshake {
        version: u32,
        #[serde(default)]
        token: Option<String>,
    },
    Heartbeat {
        client_time: u64,
    },
    Disconnect {
        #[serde(default)]
        reason: Option<String>,
    },

    RegisterRoom {
        room_name: String,
        bet_amount: i64,
    },
    JoinRoom {
        room_name: String,
    },
    LeaveRoom {
        room_name: String,
    },
    ListRooms,
    CreateGame {
        room_name: String,
    },
    StartGame {
        game_id: GameId,
    },

    RollDice {
        game_id: GameId,
        #[serde(default)]
        user_id: Option<UserId>,
    },
    MovePawn {
        game_id: GameId,
        #[serde(default)]
        user_id: Option<UserId>,
        pawn_id: u8,
    },
    SkipTurn {
        game_id: GameId,
        #[serde(default)]
        user_id: Option<UserId>,
    },
    Forfeit {
        game_id: GameId,
        #[serde(default)]
        user_id: Option<UserId>,
    },
    GetValidMoves {
        game_id: GameId,
    },
    GetGame {
        game_id: GameId,
    },
    GetBoardInfo {
        game_id: GameId,
    },

    CreateWallet {
        #[serde(default)]
        initial_balance: Option<i64>,
    },
    GetWalletBalance,
    AddFunds {
        amount: i64,
    },
    CheckSufficientFunds {
        amount: i64,
    },
}

impl ClientMessage {
    /// The wire name of this message, for logs.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Disconnect { .. } => "disconnect",
            Self::RegisterRoom { .. } => "register_room",
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::ListRooms => "list_rooms",
            Self::CreateGame { .. } => "create_game",
            Self::StartGame { .. } => "start_game",
            Self::RollDice { .. } => "roll_dice",
            Self::MovePawn { .. } => "move_pawn",
            Self::SkipTurn { .. } => "skip_turn",
            Self::Forfeit { .. } => "forfeit",
            Self::GetValidMoves { .. } => "get_valid_moves",
            Self::GetGame { .. } => "get_game",
            Self::GetBoardInfo { .. } => "get_board_info",
            Self::CreateWallet { .. } => "create_wallet",
            Self::GetWalletBalance => "get_wallet_balance",
            Self::AddFunds { .. } => "add_funds",
            Self::CheckSufficientFunds { .. } => "check_sufficient_funds",
        }
    }

    /// The identity a game command claims to act for, if it names one.
    pub fn claimed_user(&self) -> Option<&UserId> {
        match self {
            Self::RollDice { user_id, .. }
            | Self::MovePawn { user_id, .. }
            | Self::SkipTurn { user_id, .. }
            | Self::Forfeit { user_id, .. } => user_id.as_ref(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Messages the server sends, either as the reply to a command or as a
/// broadcast to everyone in a room or game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    HandshakeAck {
        user_id: UserId,
        server_time: u64,
        protocol_version: u32,
    },
    HeartbeatAck {
        client_time: u64,
        server_time: u64,
    },

    RoomCreated {
        room: RoomView,
    },
    RoomJoined {
        room: RoomView,
    },
    RoomUpdate {
        room: RoomView,
        reason: RoomUpdateReason,
    },
    RoomList {
        rooms: Vec<RoomView>,
    },

    GameCreated {
        game: GameView,
    },
    GameStarted {
        game: GameView,
    },
    /// Full snapshot, sent on reconnect, on `get_game`, and for turn
    /// changes driven by the server (timeouts).
    GameUpdate {
        game: GameView,
        #[serde(default)]
        events: Vec<GameEvent>,
    },
    DiceRolled {
        game_id: GameId,
        user_id: UserId,
        dice_value: u8,
        /// Who acts next; the roller again unless the roll passed the turn.
        next_player: Option<UserId>,
        events: Vec<GameEvent>,
        game: GameView,
    },
    PawnMoved {
        game_id: GameId,
        user_id: UserId,
        pawn_id: u8,
        from_position: i16,
        to_position: i16,
        captured: Vec<CapturedPawn>,
        next_player: Option<UserId>,
        events: Vec<GameEvent>,
        game: GameView,
    },
    TurnSkipped {
        game_id: GameId,
        user_id: UserId,
        reason: SkipReason,
        next_player: Option<UserId>,
        game: GameView,
    },
    PlayerForfeited {
        game_id: GameId,
        user_id: UserId,
        game: GameView,
    },
    GameFinished {
        game_id: GameId,
        winner_id: UserId,
        prize_amount: i64,
        game: GameView,
    },
    /// A promoted game nobody started in time. Every player's stake was
    /// returned.
    GameCancelled {
        game_id: GameId,
        refunded: i64,
        game: GameView,
    },
    ValidMoves {
        game_id: GameId,
        valid_moves: Vec<MoveView>,
    },
    BoardInfo {
        game_id: GameId,
        board: BoardView,
    },

    WalletUpdate {
        balance: i64,
    },
    SufficientFunds {
        amount: i64,
        balance: i64,
        sufficient: bool,
    },

    /// Sent only to the connection whose command failed. `kind` is a
    /// stable snake_case name; `session_not_found` means no live or
    /// archived game has the requested id.
    Error {
        code: u16,
        kind: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: u16, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            kind: kind.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_serializes_as_plain_number() {
        assert_eq!(serde_json::to_string(&RoomId(99)).unwrap(), "99");
        assert_eq!(RoomId(3).to_string(), "R-3");
    }

    #[test]
    fn test_client_message_wire_format() {
        let raw = r#"{
            "seq": 4,
            "timestamp": 1000,
            "message": {
                "event": "move_pawn",
                "payload": {"game_id": 2, "user_id": "alice", "pawn_id": 1}
            }
        }"#;
        let envelope: Envelope<ClientMessage> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.seq, 4);
        assert_eq!(
            envelope.message,
            ClientMessage::MovePawn {
                game_id: GameId(2),
                user_id: Some(UserId::new("alice")),
                pawn_id: 1,
            }
        );
        assert_eq!(envelope.message.event_name(), "move_pawn");
    }

    #[test]
    fn test_client_message_optional_fields_may_be_omitted() {
        let raw = r#"{"message": {"event": "roll_dice", "payload": {"game_id": 5}}}"#;
        let envelope: Envelope<ClientMessage> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.seq, 0);
        assert_eq!(envelope.message.claimed_user(), None);

        let raw = r#"{"message": {"event": "handshake", "payload": {"version": 1}}}"#;
        let envelope: Envelope<ClientMessage> = serde_json::from_str(raw).unwrap();
        assert_eq!(
            envelope.message,
            ClientMessage::Handshake {
                version: 1,
                token: None
            }
        );
    }

    #[test]
    fn test_unit_events_need_no_payload() {
        let raw = r#"{"message": {"event": "get_wallet_balance"}}"#;
        let envelope: Envelope<ClientMessage> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.message, ClientMessage::GetWalletBalance);
    }

    #[test]
    fn test_server_error_wire_format() {
        let msg = ServerMessage::error(422, "invalid_stake", "stake must be positive");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["payload"]["code"], 422);
        assert_eq!(json["payload"]["kind"], "invalid_stake");
    }

    #[test]
    fn test_wallet_update_wire_format() {
        let json = serde_json::to_value(ServerMessage::WalletUpdate { balance: 75 }).unwrap();
        assert_eq!(json, serde_json::json!({"event": "wallet_update", "payload": {"balance": 75}}));
    }

    #[test]
    fn test_room_state_joinable_only_when_open() {
        assert!(RoomState::Open.is_joinable());
        assert!(!RoomState::Escrowing.is_joinable());
        assert!(!RoomState::Closed.is_joinable());
        assert_eq!(serde_json::to_string(&RoomState::Escrowing).unwrap(), "\"escrowing\"");
    }
}
