//! Session data.

use std::sync::Arc;
use std::time::Instant;

use ludo_protocol::{ServerMessage, UserId};
use ludo_transport::ConnectionId;
use serde::Deserialize;
use tokio::sync::mpsc;

/// Queue feeding one connection's writer task.
///
/// Messages are shared behind `Arc` so a broadcast serializes nothing
/// until each writer encodes its own frame.
pub type Outbox = mpsc::UnboundedSender<Arc<ServerMessage>>;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds a disconnected session is kept before it expires.
    pub reconnect_grace_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected { since: Instant },
    Expired,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    /// The connection currently (or last) bound to this user.
    pub connection: ConnectionId,
    pub state: SessionState,
    pub(crate) outbox: Option<Outbox>,
}

impl Session {
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }
}
