//! Per-connection gateway: handshake, auth, and command routing.
//!
//! Each accepted connection gets its own Tokio task running this gateway.
//! The flow is:
//!   1. Receive `handshake` → validate version
//!   2. Authenticate token (payload, or the upgrade's bearer header) → `UserId`
//!   3. Bind the session and start the writer task → `handshake_ack`
//!   4. Loop: receive envelopes → dispatch to lobby, game sessions or wallet
//!
//! Everything the server sends after the handshake goes through the
//! session's outbox, so replies and broadcasts share one ordered,
//! sequence-numbered stream per connection. A separate reader task owns
//! the socket's inbound half, so a disconnect is noticed even while a
//! game command is still queued behind other players' moves.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ludo_board::{Action, GameId, UserId};
use ludo_protocol::{
    ClientMessage, Codec, Envelope, ProtocolError, RoomState, RoomUpdateReason, ServerMessage,
    PROTOCOL_VERSION,
};
use ludo_room::CreateGameOutcome;
use ludo_session::{Authenticator, ConnectOutcome, Outbox, SessionError};
use ludo_transport::{Connection, ConnectionId, WebSocketConnection};
use ludo_wallet::Wallet;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::server::ServerState;
use crate::LudoError;

/// Marks the session disconnected when the gateway exits, however it
/// exits.
struct SessionGuard<A: Authenticator, C: Codec, W: Wallet> {
    user: UserId,
    connection: ConnectionId,
    state: Arc<ServerState<A, C, W>>,
}

impl<A: Authenticator, C: Codec, W: Wallet> Drop for SessionGuard<A, C, W> {
    fn drop(&mut self) {
        self.state
            .lobby
            .sessions()
            .disconnect(&self.user, self.connection);
    }
}

enum Flow {
    Continue,
    Close,
}

/// Inbound frames the reader may buffer while a command is in flight.
const INBOUND_BACKLOG: usize = 32;

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, C, W>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, C, W>>,
) -> Result<(), LudoError>
where
    A: Authenticator,
    C: Codec,
    W: Wallet,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");

    // --- Step 1: Handshake ---
    let user = match perform_handshake(&conn, &state).await {
        Ok(user) => user,
        Err(err) => {
            let _ = conn.close().await;
            return Err(err);
        }
    };

    // --- Step 2: Session and writer ---
    let (outbox, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(Arc::clone(&conn), Arc::clone(&state), rx));

    let outcome = state
        .lobby
        .sessions()
        .connect(&user, conn_id, outbox.clone());
    let guard = SessionGuard {
        user: user.clone(),
        connection: conn_id,
        state: Arc::clone(&state),
    };
    match outcome {
        ConnectOutcome::Replaced { previous } => {
            info!(%conn_id, %user, %previous, "user authenticated, previous connection replaced")
        }
        _ => info!(%conn_id, %user, ?outcome, "user authenticated"),
    }

    push(
        &outbox,
        ServerMessage::HandshakeAck {
            user_id: user.clone(),
            server_time: now_ms(),
            protocol_version: PROTOCOL_VERSION,
        },
    );
    if let Some(game) = state.lobby.current_game(&user).await {
        debug!(%user, game_id = %game.game_id, "resuming active game");
        push(
            &outbox,
            ServerMessage::GameUpdate {
                game,
                events: Vec::new(),
            },
        );
    }

    // --- Step 3: Command loop ---
    let (frames_tx, mut frames) = mpsc::channel(INBOUND_BACKLOG);
    let (gone_tx, mut gone) = watch::channel(());
    let reader = tokio::spawn(read_loop(
        Arc::clone(&conn),
        user.clone(),
        state.config.idle_timeout(),
        frames_tx,
        gone_tx,
    ));
    loop {
        // A socket that is already gone takes its unread frames with it.
        let data = tokio::select! {
            biased;
            _ = gone.changed() => break,
            frame = frames.recv() => match frame {
                Some(data) => data,
                None => break,
            },
        };

        let envelope: Envelope<ClientMessage> = match state.codec.decode(&data) {
            Ok(env) => env,
            Err(e) => {
                warn!(%user, error = %e, "failed to decode envelope");
                push_error(&outbox, &e.into());
                continue;
            }
        };

        let event = envelope.message.event_name();
        debug!(%user, seq = envelope.seq, event, "command received");
        match dispatch(&state, &user, envelope.message, &mut gone).await {
            Ok((reply, flow)) => {
                if let Some(reply) = reply {
                    push(&outbox, reply);
                }
                if let Flow::Close = flow {
                    break;
                }
            }
            Err(err) => {
                if err.is_internal() {
                    error!(%user, event, error = %err, "command failed");
                } else {
                    debug!(%user, event, error = %err, "command rejected");
                }
                push_error(&outbox, &err);
            }
        }
    }

    reader.abort();
    // The guard clears the session's copy of the outbox; dropping ours
    // lets the writer drain what is queued and stop.
    drop(guard);
    drop(outbox);
    if let Err(e) = writer.await {
        warn!(%user, error = %e, "writer task failed");
    }
    let _ = conn.close().await;
    Ok(())
}

/// Receives and validates the handshake. Failures are reported to the
/// client before returning.
async fn perform_handshake<A, C, W>(
    conn: &WebSocketConnection,
    state: &ServerState<A, C, W>,
) -> Result<UserId, LudoError>
where
    A: Authenticator,
    C: Codec,
    W: Wallet,
{
    let data = match tokio::time::timeout(state.config.handshake_timeout(), conn.recv()).await {
        Ok(Ok(Some(data))) => Ok(data),
        Ok(Ok(None)) => Err(SessionError::AuthFailed("connection closed before handshake".into())),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => Err(SessionError::AuthFailed("no credential presented in time".into())),
    };

    let result = match data.map(|data| state.codec.decode::<Envelope<ClientMessage>>(&data)) {
        Err(e) => Err(e.into()),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(Envelope {
            message: ClientMessage::Handshake { version, token },
            ..
        })) => {
            if version != PROTOCOL_VERSION {
                Err(LudoError::VersionMismatch {
                    expected: PROTOCOL_VERSION,
                    got: version,
                })
            } else {
                let token = token
                    .as_deref()
                    .or_else(|| conn.bearer_token())
                    .unwrap_or("");
                state.auth.authenticate(token).await.map_err(LudoError::from)
            }
        }
        Ok(Ok(other)) => Err(ProtocolError::InvalidMessage(format!(
            "first message must be handshake, got {}",
            other.message.event_name()
        ))
        .into()),
    };

    if let Err(err) = &result {
        warn!(conn_id = %conn.id(), error = %err, "handshake rejected");
        // The peer may already be gone; the rejection stands either way.
        if let Err(e) = send_direct(conn, &state.codec, &error_message(err)).await {
            debug!(conn_id = %conn.id(), error = %e, "could not report handshake rejection");
        }
    }
    result
}

/// Forwards data frames to the command loop until the peer closes or
/// stays silent for `idle`. Dropping `_gone` on exit tells the command
/// loop the socket is finished.
async fn read_loop(
    conn: Arc<WebSocketConnection>,
    user: UserId,
    idle: Duration,
    frames: mpsc::Sender<Vec<u8>>,
    _gone: watch::Sender<()>,
) {
    loop {
        // Pings reset the clock too, so wait only for what is left of it.
        let quiet = conn.idle_for();
        if quiet >= idle {
            info!(%user, idle_secs = idle.as_secs(), "connection idle, dropping");
            return;
        }
        match tokio::time::timeout(idle - quiet, conn.recv()).await {
            Ok(Ok(Some(data))) => {
                if frames.send(data).await.is_err() {
                    return;
                }
            }
            Ok(Ok(None)) => {
                info!(%user, "connection closed cleanly");
                return;
            }
            Ok(Err(e)) => {
                debug!(%user, error = %e, "recv error");
                return;
            }
            Err(_) => {}
        }
    }
}

/// Runs `work` unless the connection goes away first. Dropping `work`
/// drops any reply channel it was waiting on, so a game session skips
/// the command instead of applying it for a player who has left.
async fn until_closed<T>(
    work: impl Future<Output = T>,
    gone: &mut watch::Receiver<()>,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = gone.changed() => None,
        out = work => Some(out),
    }
}

/// Maps one command to lobby, game session or wallet operations.
///
/// Commands whose outcome is broadcast to the caller anyway (joins, game
/// starts, moves) reply with `None`.
async fn dispatch<A, C, W>(
    state: &ServerState<A, C, W>,
    user: &UserId,
    message: ClientMessage,
    gone: &mut watch::Receiver<()>,
) -> Result<(Option<ServerMessage>, Flow), LudoError>
where
    A: Authenticator,
    C: Codec,
    W: Wallet,
{
    if let Some(claimed) = message.claimed_user() {
        if claimed != user {
            return Err(LudoError::IdentityMismatch {
                claimed: claimed.clone(),
                actual: user.clone(),
            });
        }
    }

    let lobby = &state.lobby;
    let reply = match message {
        ClientMessage::Handshake { .. } => {
            return Err(ProtocolError::InvalidMessage("already handshaken".into()).into());
        }
        ClientMessage::Heartbeat { client_time } => Some(ServerMessage::HeartbeatAck {
            client_time,
            server_time: now_ms(),
        }),
        ClientMessage::Disconnect { reason } => {
            info!(%user, reason = reason.as_deref().unwrap_or(""), "client disconnected");
            return Ok((None, Flow::Close));
        }

        ClientMessage::RegisterRoom {
            room_name,
            bet_amount,
        } => Some(ServerMessage::RoomCreated {
            room: lobby.register_room(user, &room_name, bet_amount)?,
        }),
        ClientMessage::JoinRoom { room_name } => {
            lobby.join_room(user, &room_name).await?;
            None
        }
        ClientMessage::LeaveRoom { room_name } => {
            let room = lobby.leave_room(user, &room_name)?;
            let reason = if room.state == RoomState::Closed {
                RoomUpdateReason::Closed
            } else {
                RoomUpdateReason::MemberLeft
            };
            Some(ServerMessage::RoomUpdate { room, reason })
        }
        ClientMessage::ListRooms => Some(ServerMessage::RoomList {
            rooms: lobby.list_rooms(),
        }),
        ClientMessage::CreateGame { room_name } => {
            match lobby.create_game(user, &room_name).await? {
                CreateGameOutcome::Existing(game) => Some(ServerMessage::GameCreated { game }),
                CreateGameOutcome::Promoted(_) => None,
            }
        }
        ClientMessage::StartGame { game_id } => {
            lobby.start_game(user, game_id).await?;
            None
        }

        ClientMessage::RollDice { game_id, .. } => {
            return play(state, user, game_id, Action::Roll, gone).await;
        }
        ClientMessage::MovePawn {
            game_id, pawn_id, ..
        } => return play(state, user, game_id, Action::Move { pawn_id }, gone).await,
        ClientMessage::SkipTurn { game_id, .. } => {
            return play(state, user, game_id, Action::Skip, gone).await;
        }
        ClientMessage::Forfeit { game_id, .. } => {
            return play(state, user, game_id, Action::Forfeit, gone).await;
        }
        ClientMessage::GetValidMoves { game_id } => Some(ServerMessage::ValidMoves {
            game_id,
            valid_moves: lobby.valid_moves(user, game_id).await?,
        }),
        ClientMessage::GetGame { game_id } => Some(ServerMessage::GameUpdate {
            game: lobby.game_view(game_id).await?,
            events: Vec::new(),
        }),
        ClientMessage::GetBoardInfo { game_id } => Some(ServerMessage::BoardInfo {
            game_id,
            board: lobby.game_view(game_id).await?.board,
        }),

        ClientMessage::CreateWallet { initial_balance } => {
            let opening = initial_balance.unwrap_or(state.config.wallet.opening_balance);
            Some(ServerMessage::WalletUpdate {
                balance: lobby.wallet().create(user, opening).await?,
            })
        }
        ClientMessage::GetWalletBalance => Some(ServerMessage::WalletUpdate {
            balance: lobby.wallet().balance(user).await?,
        }),
        ClientMessage::AddFunds { amount } => Some(ServerMessage::WalletUpdate {
            balance: lobby.wallet().credit(user, amount).await?,
        }),
        ClientMessage::CheckSufficientFunds { amount } => {
            let sufficient = lobby.wallet().has_sufficient(user, amount).await?;
            let balance = lobby.wallet().balance(user).await?;
            Some(ServerMessage::SufficientFunds {
                amount,
                balance,
                sufficient,
            })
        }
    };
    Ok((reply, Flow::Continue))
}

/// Game commands reply through the session's broadcast, which already
/// reached the caller. A command still queued when the socket closes is
/// abandoned.
async fn play<A, C, W>(
    state: &ServerState<A, C, W>,
    user: &UserId,
    game_id: GameId,
    action: Action,
    gone: &mut watch::Receiver<()>,
) -> Result<(Option<ServerMessage>, Flow), LudoError>
where
    A: Authenticator,
    C: Codec,
    W: Wallet,
{
    match until_closed(state.lobby.play(user, game_id, action), gone).await {
        Some(played) => {
            played?;
            Ok((None, Flow::Continue))
        }
        None => {
            debug!(%user, %game_id, ?action, "connection closed, queued command abandoned");
            Ok((None, Flow::Close))
        }
    }
}

/// Drains the outbox into sequence-numbered frames until every sender
/// is gone.
async fn write_loop<A, C, W>(
    conn: Arc<WebSocketConnection>,
    state: Arc<ServerState<A, C, W>>,
    mut rx: mpsc::UnboundedReceiver<Arc<ServerMessage>>,
) where
    A: Authenticator,
    C: Codec,
    W: Wallet,
{
    let mut seq: u64 = 0;
    while let Some(message) = rx.recv().await {
        seq += 1;
        let envelope = Envelope::new(seq, now_ms(), message.as_ref());
        let bytes = match state.codec.encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(conn_id = %conn.id(), error = %e, "failed to encode frame");
                continue;
            }
        };
        if let Err(e) = conn.send(&bytes).await {
            debug!(conn_id = %conn.id(), error = %e, "send failed, writer stopping");
            break;
        }
    }
}

/// Sends one frame without going through an outbox. Only used before the
/// session exists.
async fn send_direct(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    message: &ServerMessage,
) -> Result<(), LudoError> {
    let bytes = codec.encode(&Envelope::new(1, now_ms(), message))?;
    conn.send(&bytes).await?;
    Ok(())
}

fn push(outbox: &Outbox, message: ServerMessage) {
    let _ = outbox.send(Arc::new(message));
}

fn push_error(outbox: &Outbox, err: &LudoError) {
    push(outbox, error_message(err));
}

fn error_message(err: &LudoError) -> ServerMessage {
    let message = if err.is_internal() {
        "internal server error".to_string()
    } else {
        err.to_string()
    };
    ServerMessage::error(err.status_code(), err.kind(), message)
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
