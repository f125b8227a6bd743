//! Integration tests for the Ludo server: handshake, gateway routing and
//! full games played over real WebSocket connections.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use ludo_board::{GameId, UserId};
use ludo_protocol::{ClientMessage, Envelope, ServerMessage, PROTOCOL_VERSION};
use ludo_room::GameConfig;
use ludo_server::prelude::*;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn auth() -> StaticTokenAuthenticator {
    (1..=4)
        .map(|i| (format!("token-{i}"), UserId::new(format!("user{i}"))))
        .collect()
}

/// Starts a server on a random port and returns the address.
async fn start_server(config: ServerConfig, dice: DiceFactory) -> String {
    let server = LudoServerBuilder::new()
        .config(config)
        .bind("127.0.0.1:0")
        .dice(dice)
        .build(auth(), InMemoryWallet::new())
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

async fn default_server() -> String {
    start_server(ServerConfig::default(), ScriptedDice::factory([6, 4])).await
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, message: ClientMessage) {
    let bytes = serde_json::to_vec(&Envelope::new(0, 0, message)).expect("encode");
    ws.send(Message::Binary(bytes.into())).await.expect("send");
}

async fn send_raw(ws: &mut ClientWs, raw: &str) {
    ws.send(Message::Text(raw.to_owned().into()))
        .await
        .expect("send");
}

/// Next server envelope; panics on close or after two seconds.
async fn recv_envelope(ws: &mut ClientWs) -> Envelope<ServerMessage> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("recv error");
        match msg {
            Message::Text(_) | Message::Binary(_) => {
                return serde_json::from_slice(&msg.into_data()).expect("decode");
            }
            Message::Close(frame) => panic!("connection closed: {frame:?}"),
            _ => continue,
        }
    }
}

async fn recv(ws: &mut ClientWs) -> ServerMessage {
    recv_envelope(ws).await.message
}

/// Skips broadcasts until one matches.
async fn recv_until(ws: &mut ClientWs, wanted: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
    for _ in 0..50 {
        let msg = recv(ws).await;
        if wanted(&msg) {
            return msg;
        }
    }
    panic!("wanted message never arrived");
}

async fn expect_closed(ws: &mut ClientWs) {
    let result = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;
    match result {
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => {}
        other => panic!("expected close, got {other:?}"),
    }
}

/// Connects, handshakes as `user{n}` and opens a wallet.
async fn player(addr: &str, n: usize) -> ClientWs {
    let mut ws = connect(addr).await;
    send(
        &mut ws,
        ClientMessage::Handshake {
            version: PROTOCOL_VERSION,
            token: Some(format!("token-{n}")),
        },
    )
    .await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::HandshakeAck { .. }));
    send(&mut ws, ClientMessage::CreateWallet { initial_balance: Some(100) }).await;
    assert!(matches!(
        recv(&mut ws).await,
        ServerMessage::WalletUpdate { balance: 100 }
    ));
    ws
}

/// Four players in "Quick Game" with stake 25; returns once everyone has
/// seen the game start.
async fn quick_game(addr: &str) -> (Vec<ClientWs>, GameId) {
    let mut players = Vec::new();
    for n in 1..=4 {
        players.push(player(addr, n).await);
    }
    send(
        &mut players[0],
        ClientMessage::RegisterRoom {
            room_name: "Quick Game".into(),
            bet_amount: 25,
        },
    )
    .await;
    assert!(matches!(
        recv(&mut players[0]).await,
        ServerMessage::RoomCreated { .. }
    ));
    for ws in players.iter_mut().skip(1) {
        send(
            ws,
            ClientMessage::JoinRoom {
                room_name: "Quick Game".into(),
            },
        )
        .await;
        assert!(matches!(recv(ws).await, ServerMessage::RoomJoined { .. }));
    }

    let mut game_id = None;
    for ws in players.iter_mut() {
        if let ServerMessage::GameStarted { game } =
            recv_until(ws, |m| matches!(m, ServerMessage::GameStarted { .. })).await
        {
            game_id = Some(game.game_id);
        }
    }
    (players, game_id.expect("game started"))
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_success() {
    let addr = default_server().await;
    let mut ws = connect(&addr).await;
    send(
        &mut ws,
        ClientMessage::Handshake {
            version: PROTOCOL_VERSION,
            token: Some("token-1".into()),
        },
    )
    .await;

    let ack = recv_envelope(&mut ws).await;
    assert_eq!(ack.seq, 1);
    match ack.message {
        ServerMessage::HandshakeAck {
            user_id,
            protocol_version,
            ..
        } => {
            assert_eq!(user_id, UserId::new("user1"));
            assert_eq!(protocol_version, PROTOCOL_VERSION);
        }
        other => panic!("expected HandshakeAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_version_mismatch_closes() {
    let addr = default_server().await;
    let mut ws = connect(&addr).await;
    send(
        &mut ws,
        ClientMessage::Handshake {
            version: 999,
            token: Some("token-1".into()),
        },
    )
    .await;

    match recv(&mut ws).await {
        ServerMessage::Error { code, kind, .. } => {
            assert_eq!(code, 400);
            assert_eq!(kind, "version_mismatch");
        }
        other => panic!("expected Error, got {other:?}"),
    }
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_handshake_bad_token_is_401_and_closes() {
    let addr = default_server().await;
    let mut ws = connect(&addr).await;
    send(
        &mut ws,
        ClientMessage::Handshake {
            version: PROTOCOL_VERSION,
            token: Some("forged".into()),
        },
    )
    .await;

    match recv(&mut ws).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, 401),
        other => panic!("expected Error 401, got {other:?}"),
    }
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_silent_client_gets_401_before_close() {
    let addr = start_server(
        ServerConfig {
            handshake_timeout_secs: 1,
            ..ServerConfig::default()
        },
        ScriptedDice::factory([6]),
    )
    .await;
    let mut ws = connect(&addr).await;

    match recv(&mut ws).await {
        ServerMessage::Error { code, kind, .. } => {
            assert_eq!(code, 401);
            assert_eq!(kind, "unauthorized");
        }
        other => panic!("expected Error 401, got {other:?}"),
    }
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_first_message_must_be_handshake() {
    let addr = default_server().await;
    let mut ws = connect(&addr).await;
    send(&mut ws, ClientMessage::ListRooms).await;

    match recv(&mut ws).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, 400),
        other => panic!("expected Error 400, got {other:?}"),
    }
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_bearer_header_authenticates() {
    let addr = default_server().await;
    let mut request = format!("ws://{addr}").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", "Bearer token-2".parse().unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    send(
        &mut ws,
        ClientMessage::Handshake {
            version: PROTOCOL_VERSION,
            token: None,
        },
    )
    .await;
    match recv(&mut ws).await {
        ServerMessage::HandshakeAck { user_id, .. } => assert_eq!(user_id, UserId::new("user2")),
        other => panic!("expected HandshakeAck, got {other:?}"),
    }
}

// =========================================================================
// Gateway
// =========================================================================

#[tokio::test]
async fn test_heartbeat_response() {
    let addr = default_server().await;
    let mut ws = player(&addr, 1).await;
    send(&mut ws, ClientMessage::Heartbeat { client_time: 12345 }).await;

    match recv(&mut ws).await {
        ServerMessage::HeartbeatAck {
            client_time,
            server_time,
        } => {
            assert_eq!(client_time, 12345);
            assert!(server_time > 0);
        }
        other => panic!("expected HeartbeatAck, got {other:?}"),
    }
}

/// One-second idle limit with no turn timer to stretch it.
fn short_idle() -> ServerConfig {
    ServerConfig {
        idle_timeout_secs: 1,
        game: GameConfig {
            turn_timeout_secs: 0,
            ..GameConfig::default()
        },
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn test_pings_keep_an_idle_connection_open() {
    let addr = start_server(short_idle(), ScriptedDice::factory([6])).await;
    let mut ws = player(&addr, 1).await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(400)).await;
        ws.send(Message::Ping(b"keepalive".to_vec().into()))
            .await
            .expect("ping");
    }
    send(&mut ws, ClientMessage::Heartbeat { client_time: 9 }).await;
    assert!(matches!(
        recv(&mut ws).await,
        ServerMessage::HeartbeatAck { client_time: 9, .. }
    ));
}

#[tokio::test]
async fn test_silent_connection_is_dropped_after_idle_timeout() {
    let addr = start_server(short_idle(), ScriptedDice::factory([6])).await;
    let mut ws = player(&addr, 1).await;
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_unknown_game_is_session_not_found() {
    let addr = default_server().await;
    let mut ws = player(&addr, 1).await;
    send(&mut ws, ClientMessage::GetGame { game_id: GameId(999) }).await;
    match recv(&mut ws).await {
        ServerMessage::Error { code, kind, .. } => {
            assert_eq!(code, 404);
            assert_eq!(kind, "session_not_found");
        }
        other => panic!("expected Error 404, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_frame_is_400_and_connection_survives() {
    let addr = default_server().await;
    let mut ws = player(&addr, 1).await;
    send_raw(&mut ws, "{not json").await;
    match recv(&mut ws).await {
        ServerMessage::Error { code, kind, .. } => {
            assert_eq!(code, 400);
            assert_eq!(kind, "malformed");
        }
        other => panic!("expected Error 400, got {other:?}"),
    }

    send(&mut ws, ClientMessage::Heartbeat { client_time: 1 }).await;
    assert!(matches!(
        recv(&mut ws).await,
        ServerMessage::HeartbeatAck { client_time: 1, .. }
    ));
}

#[tokio::test]
async fn test_disconnect_closes_connection() {
    let addr = default_server().await;
    let mut ws = player(&addr, 1).await;
    send(
        &mut ws,
        ClientMessage::Disconnect {
            reason: Some("bye".into()),
        },
    )
    .await;
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_room_errors_carry_status_codes() {
    let addr = default_server().await;
    let mut ws = player(&addr, 1).await;

    send(
        &mut ws,
        ClientMessage::JoinRoom {
            room_name: "nowhere".into(),
        },
    )
    .await;
    assert!(matches!(
        recv(&mut ws).await,
        ServerMessage::Error { code: 404, .. }
    ));

    send(
        &mut ws,
        ClientMessage::RegisterRoom {
            room_name: "free".into(),
            bet_amount: -3,
        },
    )
    .await;
    assert!(matches!(
        recv(&mut ws).await,
        ServerMessage::Error { code: 422, .. }
    ));

    send(&mut ws, ClientMessage::ListRooms).await;
    assert!(matches!(
        recv(&mut ws).await,
        ServerMessage::RoomList { rooms } if rooms.is_empty()
    ));
}

#[tokio::test]
async fn test_wallet_commands() {
    let addr = default_server().await;
    let mut ws = player(&addr, 1).await;

    send(&mut ws, ClientMessage::AddFunds { amount: 50 }).await;
    assert!(matches!(
        recv(&mut ws).await,
        ServerMessage::WalletUpdate { balance: 150 }
    ));

    send(&mut ws, ClientMessage::CheckSufficientFunds { amount: 200 }).await;
    assert!(matches!(
        recv(&mut ws).await,
        ServerMessage::SufficientFunds {
            amount: 200,
            balance: 150,
            sufficient: false
        }
    ));

    send(&mut ws, ClientMessage::AddFunds { amount: 0 }).await;
    assert!(matches!(
        recv(&mut ws).await,
        ServerMessage::Error { code: 422, .. }
    ));
}

// =========================================================================
// Full game
// =========================================================================

#[tokio::test]
async fn test_quick_game_end_to_end() {
    let addr = default_server().await;
    let (mut players, game_id) = quick_game(&addr).await;

    send(
        &mut players[0],
        ClientMessage::RollDice {
            game_id,
            user_id: Some(UserId::new("user1")),
        },
    )
    .await;
    match recv_until(&mut players[0], |m| matches!(m, ServerMessage::DiceRolled { .. })).await {
        ServerMessage::DiceRolled { dice_value, .. } => assert_eq!(dice_value, 6),
        other => panic!("unexpected {other:?}"),
    }

    send(
        &mut players[0],
        ClientMessage::MovePawn {
            game_id,
            user_id: None,
            pawn_id: 0,
        },
    )
    .await;
    match recv_until(&mut players[0], |m| matches!(m, ServerMessage::PawnMoved { .. })).await {
        ServerMessage::PawnMoved {
            from_position,
            to_position,
            next_player,
            ..
        } => {
            assert_eq!((from_position, to_position), (-1, 50));
            assert_eq!(next_player, Some(UserId::new("user1")));
        }
        other => panic!("unexpected {other:?}"),
    }

    send(&mut players[0], ClientMessage::RollDice { game_id, user_id: None }).await;
    match recv_until(&mut players[0], |m| matches!(m, ServerMessage::DiceRolled { .. })).await {
        ServerMessage::DiceRolled { dice_value, .. } => assert_eq!(dice_value, 4),
        other => panic!("unexpected {other:?}"),
    }
    send(
        &mut players[0],
        ClientMessage::MovePawn {
            game_id,
            user_id: None,
            pawn_id: 0,
        },
    )
    .await;

    // Every player sees the same move.
    for ws in players.iter_mut() {
        let moved = recv_until(ws, |m| {
            matches!(m, ServerMessage::PawnMoved { from_position: 50, .. })
        })
        .await;
        match moved {
            ServerMessage::PawnMoved {
                to_position,
                next_player,
                ..
            } => {
                assert_eq!(to_position, 54);
                assert_eq!(next_player, Some(UserId::new("user2")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    send(&mut players[1], ClientMessage::GetWalletBalance).await;
    assert!(matches!(
        recv(&mut players[1]).await,
        ServerMessage::WalletUpdate { balance: 75 }
    ));
}

#[tokio::test]
async fn test_errors_go_only_to_the_sender() {
    let addr = default_server().await;
    let (mut players, game_id) = quick_game(&addr).await;

    // user2 tries to act on user1's turn.
    send(&mut players[1], ClientMessage::RollDice { game_id, user_id: None }).await;
    match recv(&mut players[1]).await {
        ServerMessage::Error { code, kind, .. } => {
            assert_eq!(code, 409);
            assert_eq!(kind, "out_of_turn");
        }
        other => panic!("expected Error 409, got {other:?}"),
    }

    // user1's stream carries nothing about it.
    send(&mut players[0], ClientMessage::Heartbeat { client_time: 7 }).await;
    assert!(matches!(
        recv(&mut players[0]).await,
        ServerMessage::HeartbeatAck { client_time: 7, .. }
    ));
}

#[tokio::test]
async fn test_identity_mismatch_is_403() {
    let addr = default_server().await;
    let (mut players, game_id) = quick_game(&addr).await;

    send(
        &mut players[0],
        ClientMessage::RollDice {
            game_id,
            user_id: Some(UserId::new("user2")),
        },
    )
    .await;
    match recv(&mut players[0]).await {
        ServerMessage::Error { code, kind, .. } => {
            assert_eq!(code, 403);
            assert_eq!(kind, "identity_mismatch");
        }
        other => panic!("expected Error 403, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reconnect_resumes_active_game() {
    let addr = default_server().await;
    let (mut players, game_id) = quick_game(&addr).await;

    let dropped = players.remove(2);
    drop(dropped);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ws = connect(&addr).await;
    send(
        &mut ws,
        ClientMessage::Handshake {
            version: PROTOCOL_VERSION,
            token: Some("token-3".into()),
        },
    )
    .await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::HandshakeAck { .. }));
    match recv(&mut ws).await {
        ServerMessage::GameUpdate { game, .. } => {
            assert_eq!(game.game_id, game_id);
            assert_eq!(game.user_ids[2], UserId::new("user3"));
        }
        other => panic!("expected GameUpdate, got {other:?}"),
    }
}

#[tokio::test]
async fn test_forfeits_finish_and_pay_the_winner() {
    let addr = default_server().await;
    let (mut players, game_id) = quick_game(&addr).await;

    for ws in players.iter_mut().take(3) {
        send(ws, ClientMessage::Forfeit { game_id, user_id: None }).await;
    }

    let finished = recv_until(&mut players[3], |m| {
        matches!(m, ServerMessage::GameFinished { .. })
    })
    .await;
    match finished {
        ServerMessage::GameFinished {
            winner_id,
            prize_amount,
            ..
        } => {
            assert_eq!(winner_id, UserId::new("user4"));
            assert_eq!(prize_amount, 100);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        recv_until(&mut players[3], |m| matches!(m, ServerMessage::WalletUpdate { .. })).await,
        ServerMessage::WalletUpdate { balance: 175 }
    ));

    send(&mut players[3], ClientMessage::GetGame { game_id }).await;
    match recv_until(&mut players[3], |m| matches!(m, ServerMessage::GameUpdate { .. })).await {
        ServerMessage::GameUpdate { game, .. } => {
            assert_eq!(game.winner_id, Some(UserId::new("user4")));
            assert!(game.completed_at.is_some());
        }
        other => panic!("unexpected {other:?}"),
    }
}
