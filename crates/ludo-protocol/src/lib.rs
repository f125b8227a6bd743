//! Wire protocol for the Ludo server.
//!
//! - **Types** ([`Envelope`], [`ClientMessage`], [`ServerMessage`]): what
//!   travels on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how messages become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! Every frame is a JSON envelope:
//!
//! ```json
//! {"seq": 3, "timestamp": 1718000000000,
//!  "message": {"event": "roll_dice", "payload": {"game_id": 1}}}
//! ```
//!
//! The protocol layer knows nothing about connections or games; it only
//! names the messages and turns them into bytes and back.

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    CapturedPawn, ClientMessage, Envelope, RoomId, RoomState, RoomUpdateReason, RoomView,
    ServerMessage, PROTOCOL_VERSION,
};

pub use ludo_board::{GameId, UserId};
