//! Connection sessions for the Ludo server.
//!
//! 1. **Authentication**: turning a connect-time token into a
//!    [`UserId`](ludo_protocol::UserId) ([`Authenticator`] trait).
//! 2. **Presence**: which users are connected, and on which connection
//!    ([`SessionManager`]).
//! 3. **Outbox**: delivering server messages to a user by identity.
//!    Rooms and games never hold connections; they hold user ids and ask
//!    the session manager to deliver.
//!
//! A dropped connection only marks its session disconnected. The user
//! stays in their room or game and picks up where they left off when they
//! connect again within the grace period.

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod manager;
mod session;

pub use auth::{Authenticator, StaticTokenAuthenticator};
pub use error::SessionError;
pub use manager::{ConnectOutcome, SessionManager};
pub use session::{Outbox, Session, SessionConfig, SessionState};
