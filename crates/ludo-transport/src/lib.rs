//! Socket plumbing for the Ludo server.
//!
//! A [`Transport`] hands out upgraded connections; a [`Connection`] is a
//! split socket whose reader and writer run in different tasks. The
//! gateway owns one reader loop per connection and the session outbox
//! owns the writer.
//!
//! With the default `websocket` feature this crate provides
//! [`WebSocketTransport`], built on `tokio-tungstenite`.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// One accepted socket.
///
/// A user who reconnects gets a fresh id, so the session layer can tell
/// a late disconnect from an old socket apart from the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocates a process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Source of new client connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    fn local_addr(&self) -> std::io::Result<SocketAddr>;

    /// Waits for the next client and completes its upgrade.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// An upgraded client socket.
///
/// `send` and `recv` lock separate halves, so a reader parked in `recv`
/// never holds up the writer.
pub trait Connection: Send + Sync + 'static {
    fn id(&self) -> ConnectionId;

    fn peer_addr(&self) -> SocketAddr;

    /// Credential presented during the upgrade, for clients that cannot
    /// put a token in the handshake payload.
    fn bearer_token(&self) -> Option<&str>;

    fn send(&self, frame: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next data frame. `Ok(None)` once the peer has closed.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Time since the peer last sent anything, control frames included.
    fn idle_for(&self) -> Duration;

    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique_and_increasing() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert!(b > a);
        assert_eq!(ConnectionId::new(a.get()), a);
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }
}
