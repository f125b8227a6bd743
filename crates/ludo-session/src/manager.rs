//! Session manager: presence tracking and identity-keyed delivery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ludo_protocol::{ServerMessage, UserId};
use ludo_transport::ConnectionId;
use tracing::{debug, info};

use crate::{Outbox, Session, SessionConfig, SessionState};

/// What [`SessionManager::connect`] found for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// First session, or the previous one had expired.
    New,
    /// Reconnected within the grace period.
    Resumed,
    /// The user was still connected elsewhere; that connection no longer
    /// receives messages.
    Replaced { previous: ConnectionId },
}

/// Tracks one session per user.
///
/// Backed by a `DashMap`, so every operation locks only the entry it
/// touches and the manager can be shared as a plain `Arc`.
pub struct SessionManager {
    sessions: DashMap<UserId, Session>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
        }
    }

    fn grace(&self) -> Duration {
        Duration::from_secs(self.config.reconnect_grace_secs)
    }

    /// Binds `user` to `connection`, routing their messages to `outbox`.
    pub fn connect(&self, user: &UserId, connection: ConnectionId, outbox: Outbox) -> ConnectOutcome {
        let grace = self.grace();
        match self.sessions.entry(user.clone()) {
            Entry::Vacant(e) => {
                e.insert(Session {
                    user_id: user.clone(),
                    connection,
                    state: SessionState::Connected,
                    outbox: Some(outbox),
                });
                info!(%user, %connection, "session created");
                ConnectOutcome::New
            }
            Entry::Occupied(mut e) => {
                let session = e.get_mut();
                let outcome = match session.state {
                    SessionState::Connected => ConnectOutcome::Replaced {
                        previous: session.connection,
                    },
                    SessionState::Disconnected { since } if since.elapsed() <= grace => {
                        ConnectOutcome::Resumed
                    }
                    SessionState::Disconnected { .. } | SessionState::Expired => ConnectOutcome::New,
                };
                session.connection = connection;
                session.state = SessionState::Connected;
                session.outbox = Some(outbox);
                info!(%user, %connection, ?outcome, "session bound");
                outcome
            }
        }
    }

    /// Marks the user disconnected, but only if `connection` is still the
    /// one bound to them. A stale connection closing after a reconnect
    /// must not knock the new one offline.
    pub fn disconnect(&self, user: &UserId, connection: ConnectionId) -> bool {
        let Some(mut session) = self.sessions.get_mut(user) else {
            return false;
        };
        if session.connection != connection || !session.is_connected() {
            return false;
        }
        session.state = SessionState::Disconnected {
            since: Instant::now(),
        };
        session.outbox = None;
        info!(%user, %connection, "user disconnected, grace period started");
        true
    }

    /// Queues `message` for `user`. Returns `false` if the user is not
    /// connected or their writer has gone away.
    pub fn send(&self, user: &UserId, message: Arc<ServerMessage>) -> bool {
        let Some(session) = self.sessions.get(user) else {
            return false;
        };
        match &session.outbox {
            Some(outbox) if session.is_connected() => outbox.send(message).is_ok(),
            _ => false,
        }
    }

    /// Queues `message` for each of `users`. Returns how many were
    /// delivered to a live outbox.
    pub fn broadcast<'a>(
        &self,
        users: impl IntoIterator<Item = &'a UserId>,
        message: Arc<ServerMessage>,
    ) -> usize {
        let mut delivered = 0;
        for user in users {
            if self.send(user, Arc::clone(&message)) {
                delivered += 1;
            }
        }
        debug!(delivered, "broadcast queued");
        delivered
    }

    pub fn is_connected(&self, user: &UserId) -> bool {
        self.sessions.get(user).is_some_and(|s| s.is_connected())
    }

    pub fn state(&self, user: &UserId) -> Option<SessionState> {
        self.sessions.get(user).map(|s| s.state.clone())
    }

    /// Moves sessions disconnected longer than the grace period to
    /// `Expired` and returns their users.
    pub fn expire_stale(&self) -> Vec<UserId> {
        let grace = self.grace();
        let mut expired = Vec::new();
        for mut session in self.sessions.iter_mut() {
            if let SessionState::Disconnected { since } = session.state {
                if since.elapsed() > grace {
                    session.state = SessionState::Expired;
                    expired.push(session.user_id.clone());
                    info!(user = %session.user_id, "session expired (grace period elapsed)");
                }
            }
        }
        expired
    }

    /// Drops expired sessions.
    pub fn cleanup_expired(&self) {
        self.sessions
            .retain(|_, session| session.state != SessionState::Expired);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
