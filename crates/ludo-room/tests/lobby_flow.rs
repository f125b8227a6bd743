//! Lobby, escrow and game session flows with in-memory wallets and
//! scripted dice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ludo_board::{
    Action, DiceFactory, GameError, GameId, GameState, Phase, ScriptedDice, Settlement, SkipReason,
    UserId,
};
use ludo_protocol::{RoomState, RoomUpdateReason, ServerMessage};
use ludo_room::{
    CreateGameOutcome, GameConfig, LobbyConfig, LobbyError, LobbyManager, Promotion,
    SessionRegistry,
};
use ludo_session::{SessionConfig, SessionManager};
use ludo_transport::ConnectionId;
use ludo_wallet::{InMemoryWallet, Wallet};
use tokio::sync::mpsc;

type Inbox = mpsc::UnboundedReceiver<Arc<ServerMessage>>;

struct Harness {
    lobby: LobbyManager<InMemoryWallet>,
    users: Vec<UserId>,
    inboxes: HashMap<UserId, Inbox>,
}

impl Harness {
    fn new(balances: &[i64], config: LobbyConfig, game: GameConfig, dice: DiceFactory) -> Self {
        let users: Vec<UserId> = (1..=balances.len())
            .map(|i| UserId::new(format!("user{i}")))
            .collect();
        let wallet = InMemoryWallet::with_balances(
            users.iter().cloned().zip(balances.iter().copied()),
        );
        let sessions = Arc::new(SessionManager::new(SessionConfig::default()));
        let mut inboxes = HashMap::new();
        for (i, user) in users.iter().enumerate() {
            let (tx, rx) = mpsc::unbounded_channel();
            sessions.connect(user, ConnectionId::new(i as u64 + 1), tx);
            inboxes.insert(user.clone(), rx);
        }
        let lobby = LobbyManager::new(
            Arc::new(SessionRegistry::new()),
            sessions,
            Arc::new(wallet),
            config,
            game,
            dice,
        );
        Self {
            lobby,
            users,
            inboxes,
        }
    }

    fn user(&self, n: usize) -> &UserId {
        &self.users[n]
    }

    fn drain(&mut self, n: usize) -> Vec<Arc<ServerMessage>> {
        let rx = self.inboxes.get_mut(&self.users[n]).unwrap();
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    async fn balance(&self, n: usize) -> i64 {
        self.lobby.wallet().balance(self.user(n)).await.unwrap()
    }

    /// Registers `name` as user 0 and joins everyone else up to `count`.
    async fn fill(&self, name: &str, stake: i64, count: usize) {
        self.lobby.register_room(self.user(0), name, stake).unwrap();
        for n in 1..count {
            self.lobby.join_room(self.user(n), name).await.unwrap();
        }
    }
}

fn two_player() -> LobbyConfig {
    LobbyConfig {
        max_players: 2,
        ..LobbyConfig::default()
    }
}

fn game_id_from(messages: &[Arc<ServerMessage>]) -> GameId {
    messages
        .iter()
        .find_map(|m| match m.as_ref() {
            ServerMessage::GameCreated { game } => Some(game.game_id),
            _ => None,
        })
        .expect("no game_created message")
}

async fn wait_archived(lobby: &LobbyManager<InMemoryWallet>, game_id: GameId) {
    for _ in 0..100 {
        if lobby.registry().archived(game_id).is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("game {game_id} was never archived");
}

#[tokio::test]
async fn test_quick_game_exit_bonus_and_home_stretch() {
    let mut h = Harness::new(
        &[100, 100, 100, 100],
        LobbyConfig::default(),
        GameConfig::default(),
        ScriptedDice::factory([6, 4]),
    );
    h.fill("Quick Game", 25, 4).await;

    for n in 0..4 {
        assert_eq!(h.balance(n).await, 75);
    }
    let msgs = h.drain(3);
    assert!(matches!(msgs[0].as_ref(), ServerMessage::RoomJoined { .. }));
    let game_id = game_id_from(&msgs);
    assert!(msgs
        .iter()
        .any(|m| matches!(m.as_ref(), ServerMessage::GameStarted { .. })));

    let view = h.lobby.game_view(game_id).await.unwrap();
    assert_eq!(view.user_ids, h.users);
    assert_eq!(view.pot, 100);
    assert_eq!(view.state, GameState::InProgress);
    assert!(h.lobby.list_rooms().is_empty());

    let user0 = h.user(0).clone();
    let rolled = h.lobby.play(&user0, game_id, Action::Roll).await.unwrap();
    assert!(matches!(rolled.as_ref(), ServerMessage::DiceRolled { dice_value: 6, .. }));

    let moved = h
        .lobby
        .play(&user0, game_id, Action::Move { pawn_id: 0 })
        .await
        .unwrap();
    match moved.as_ref() {
        ServerMessage::PawnMoved {
            from_position,
            to_position,
            next_player,
            ..
        } => {
            assert_eq!((*from_position, *to_position), (-1, 50));
            assert_eq!(next_player.as_ref(), Some(&user0));
        }
        other => panic!("unexpected {other:?}"),
    }

    let rolled = h.lobby.play(&user0, game_id, Action::Roll).await.unwrap();
    assert!(matches!(rolled.as_ref(), ServerMessage::DiceRolled { dice_value: 4, .. }));
    let moves = h.lobby.valid_moves(&user0, game_id).await.unwrap();
    assert!(moves.iter().any(|m| m.pawn_id == 0 && m.to_position == Some(54)));

    let moved = h
        .lobby
        .play(&user0, game_id, Action::Move { pawn_id: 0 })
        .await
        .unwrap();
    match moved.as_ref() {
        ServerMessage::PawnMoved {
            from_position,
            to_position,
            next_player,
            ..
        } => {
            assert_eq!((*from_position, *to_position), (50, 54));
            assert_eq!(next_player.as_ref(), Some(h.user(1)));
        }
        other => panic!("unexpected {other:?}"),
    }

    // Every participant saw the same broadcast the caller got.
    let seen = h.drain(2);
    assert!(seen.iter().any(|m| Arc::ptr_eq(m, &moved)));
}

#[tokio::test]
async fn test_escrow_failure_refunds_and_evicts_only_the_short_member() {
    let mut h = Harness::new(
        &[100, 100, 10, 100],
        LobbyConfig::default(),
        GameConfig::default(),
        ScriptedDice::factory([6]),
    );
    h.fill("Quick Game", 25, 4).await;

    assert_eq!(h.balance(0).await, 100);
    assert_eq!(h.balance(1).await, 100);
    assert_eq!(h.balance(2).await, 10);
    assert_eq!(h.balance(3).await, 100);
    assert_eq!(h.lobby.registry().live_games(), 0);

    let evicted = h.drain(2);
    assert!(evicted.iter().any(|m| matches!(
        m.as_ref(),
        ServerMessage::Error { code: 422, kind, .. } if kind == "insufficient_funds"
    )));

    let stayed = h.drain(0);
    assert!(!stayed
        .iter()
        .any(|m| matches!(m.as_ref(), ServerMessage::Error { .. })));
    let last = stayed.last().unwrap();
    match last.as_ref() {
        ServerMessage::RoomUpdate { room, reason } => {
            assert_eq!(*reason, RoomUpdateReason::MemberEvicted);
            assert_eq!(room.state, RoomState::Open);
            assert_eq!(room.users.len(), 3);
            assert!(!room.users.contains(h.user(2)));
        }
        other => panic!("unexpected {other:?}"),
    }

    // The evicted member is free to join again.
    assert!(h.lobby.registry().user_room(h.user(2)).is_none());
}

#[tokio::test]
async fn test_register_and_join_rejections() {
    let h = Harness::new(
        &[100, 100, 100],
        LobbyConfig {
            auto_start: false,
            ..two_player()
        },
        GameConfig::default(),
        ScriptedDice::factory([6]),
    );
    let (u0, u1, u2) = (h.user(0).clone(), h.user(1).clone(), h.user(2).clone());

    assert!(matches!(
        h.lobby.register_room(&u0, "r", 0),
        Err(LobbyError::InvalidStake(0))
    ));
    assert!(matches!(
        h.lobby.register_room(&u0, "  ", 10),
        Err(LobbyError::InvalidRoomName)
    ));
    h.lobby.register_room(&u0, "r", 10).unwrap();
    assert!(matches!(
        h.lobby.register_room(&u1, "r", 10),
        Err(LobbyError::RoomNameTaken(_))
    ));
    assert!(matches!(
        h.lobby.register_room(&u0, "other", 10),
        Err(LobbyError::AlreadyInRoom(_))
    ));

    assert!(matches!(
        h.lobby.join_room(&u1, "missing").await,
        Err(LobbyError::RoomNotFound(_))
    ));
    assert!(matches!(
        h.lobby.join_room(&u0, "r").await,
        Err(LobbyError::AlreadyJoined { .. })
    ));
    h.lobby.join_room(&u1, "r").await.unwrap();
    assert!(matches!(
        h.lobby.join_room(&u2, "r").await,
        Err(LobbyError::RoomFull(_))
    ));
    assert!(h.lobby.registry().user_room(&u2).is_none());

    let rooms = h.lobby.list_rooms();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].users, vec![u0, u1]);
    assert_eq!(rooms[0].total_bet_amount, 20);
}

#[tokio::test]
async fn test_forfeit_pays_pot_once_and_archives() {
    let mut h = Harness::new(
        &[100, 100],
        two_player(),
        GameConfig::default(),
        ScriptedDice::factory([6]),
    );
    h.fill("duel", 25, 2).await;
    let game_id = game_id_from(&h.drain(1));

    let user0 = h.user(0).clone();
    let user1 = h.user(1).clone();
    h.lobby.play(&user0, game_id, Action::Forfeit).await.unwrap();
    wait_archived(&h.lobby, game_id).await;

    assert_eq!(h.balance(0).await, 75);
    assert_eq!(h.balance(1).await, 125);

    let view = h.lobby.game_view(game_id).await.unwrap();
    assert_eq!(view.winner_id.as_ref(), Some(&user1));
    assert_eq!(view.settlement, Some(Settlement::Paid { amount: 50 }));
    assert!(h.lobby.registry().user_game(&user1).is_none());
    assert!(h.lobby.registry().room_game("duel").is_none());

    let winner_msgs = h.drain(1);
    assert!(winner_msgs.iter().any(|m| matches!(
        m.as_ref(),
        ServerMessage::GameFinished { prize_amount: 50, winner_id, .. } if *winner_id == user1
    )));
    assert!(winner_msgs
        .iter()
        .any(|m| matches!(m.as_ref(), ServerMessage::WalletUpdate { balance: 125 })));

    // The game is over; nothing can be played and nothing is paid twice.
    let err = h.lobby.play(&user1, game_id, Action::Roll).await.unwrap_err();
    assert!(matches!(err, LobbyError::Game(GameError::OutOfTurn(_))));
    assert_eq!(h.balance(1).await, 125);
}

#[tokio::test(start_paused = true)]
async fn test_turn_timeout_skips_current_player() {
    let mut h = Harness::new(
        &[100, 100],
        two_player(),
        GameConfig {
            turn_timeout_secs: 10,
            ..GameConfig::default()
        },
        ScriptedDice::factory([6]),
    );
    h.fill("slow", 5, 2).await;
    let game_id = game_id_from(&h.drain(1));

    tokio::time::sleep(Duration::from_secs(11)).await;
    let view = h.lobby.game_view(game_id).await.unwrap();
    assert_eq!(view.board.current_player_id, 1);
    assert_eq!(view.board.state, Phase::AwaitingRoll);

    let msgs = h.drain(1);
    assert!(msgs.iter().any(|m| matches!(
        m.as_ref(),
        ServerMessage::TurnSkipped { reason: SkipReason::Timeout, user_id, .. } if user_id == &h.users[0]
    )));
}

#[tokio::test]
async fn test_concurrent_rolls_are_applied_one_at_a_time() {
    let h = Harness::new(
        &[100, 100],
        two_player(),
        GameConfig::default(),
        ScriptedDice::factory([6]),
    );
    h.fill("race", 5, 2).await;
    let game_id = h.lobby.registry().user_game(h.user(0)).unwrap();

    let user0 = h.user(0).clone();
    let (a, b) = tokio::join!(
        h.lobby.play(&user0, game_id, Action::Roll),
        h.lobby.play(&user0, game_id, Action::Roll),
    );
    let oks = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(oks, 1);
    let err = a.err().or(b.err()).unwrap();
    assert!(matches!(err, LobbyError::Game(GameError::OutOfTurn(_))));
}

#[tokio::test]
async fn test_idle_rooms_are_swept_and_members_told() {
    let mut h = Harness::new(
        &[100, 100],
        LobbyConfig {
            idle_room_timeout_secs: 60,
            ..LobbyConfig::default()
        },
        GameConfig::default(),
        ScriptedDice::factory([6]),
    );
    h.fill("sleepy", 5, 2).await;
    h.drain(0);

    assert_eq!(h.lobby.sweep_idle(Instant::now()).await, 0);
    assert_eq!(
        h.lobby
            .sweep_idle(Instant::now() + Duration::from_secs(120))
            .await,
        1
    );
    assert!(h.lobby.list_rooms().is_empty());
    assert!(h.lobby.registry().user_room(h.user(1)).is_none());

    let msgs = h.drain(0);
    assert!(msgs.iter().any(|m| matches!(
        m.as_ref(),
        ServerMessage::RoomUpdate { reason: RoomUpdateReason::Expired, .. }
    )));
}

#[tokio::test]
async fn test_unstarted_game_is_cancelled_and_refunded() {
    let mut h = Harness::new(
        &[100, 100, 100, 100],
        LobbyConfig {
            max_players: 2,
            auto_start: false,
            idle_room_timeout_secs: 60,
            ..LobbyConfig::default()
        },
        GameConfig::default(),
        ScriptedDice::factory([6]),
    );
    h.fill("lazy", 25, 2).await;
    let lazy = game_id_from(&h.drain(0));
    h.drain(1);

    // A second table that does get started is left alone.
    let (u2, u3) = (h.user(2).clone(), h.user(3).clone());
    h.lobby.register_room(&u2, "eager", 10).unwrap();
    h.lobby.join_room(&u3, "eager").await.unwrap();
    let eager = h.lobby.registry().user_game(&u2).unwrap();
    h.lobby.start_game(&u2, eager).await.unwrap();

    assert_eq!(h.balance(0).await, 75);
    assert_eq!(
        h.lobby.game_view(lazy).await.unwrap().state,
        GameState::NotStarted
    );
    assert_eq!(h.lobby.sweep_idle(Instant::now()).await, 0);
    assert_eq!(
        h.lobby
            .sweep_idle(Instant::now() + Duration::from_secs(120))
            .await,
        1
    );

    for n in 0..2 {
        assert_eq!(h.balance(n).await, 100);
        assert!(h.lobby.registry().user_game(h.user(n)).is_none());
        let msgs = h.drain(n);
        assert!(msgs.iter().any(|m| matches!(
            m.as_ref(),
            ServerMessage::GameCancelled { game_id, refunded: 25, .. } if *game_id == lazy
        )));
        assert!(msgs
            .iter()
            .any(|m| matches!(m.as_ref(), ServerMessage::WalletUpdate { balance: 100 })));
    }
    assert!(matches!(
        h.lobby.game_view(lazy).await,
        Err(LobbyError::GameNotFound(_))
    ));
    assert!(h.lobby.registry().room_game("lazy").is_none());

    assert_eq!(h.balance(2).await, 90);
    assert_eq!(
        h.lobby.game_view(eager).await.unwrap().state,
        GameState::InProgress
    );
}

/// Both players fire commands at once. Whatever order the actor picks,
/// everyone sees the same broadcasts and a rejection reaches only the
/// player who sent it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_players_share_one_broadcast_order() {
    for round in 0..10 {
        let mut h = Harness::new(
            &[100, 100],
            two_player(),
            GameConfig::default(),
            ScriptedDice::factory([3]),
        );
        let name = format!("race-{round}");
        h.fill(&name, 5, 2).await;
        let game_id = game_id_from(&h.drain(0));
        h.drain(1);
        let (u0, u1) = (h.user(0).clone(), h.user(1).clone());

        // A 3 with every pawn in the yard hands the turn over, so user1's
        // roll is legal only if it lands second.
        let (first, second) = tokio::join!(
            h.lobby.play(&u0, game_id, Action::Roll),
            h.lobby.play(&u1, game_id, Action::Roll),
        );
        let mut applied = vec![first.unwrap()];
        match second {
            Ok(rolled) => applied.push(rolled),
            Err(err) => assert!(matches!(err, LobbyError::Game(GameError::OutOfTurn(_)))),
        }

        let (seen0, seen1) = (h.drain(0), h.drain(1));
        assert_eq!(seen0, seen1);
        assert!(!seen0
            .iter()
            .any(|m| matches!(m.as_ref(), ServerMessage::Error { .. })));
        let rolls: Vec<_> = seen0
            .iter()
            .filter(|m| matches!(m.as_ref(), ServerMessage::DiceRolled { .. }))
            .collect();
        assert_eq!(rolls.len(), applied.len());
        for (seen, sent) in rolls.iter().zip(&applied) {
            assert!(Arc::ptr_eq(seen, sent));
        }
    }
}

#[tokio::test]
async fn test_creator_leaving_closes_room() {
    let mut h = Harness::new(
        &[100, 100, 100],
        LobbyConfig::default(),
        GameConfig::default(),
        ScriptedDice::factory([6]),
    );
    h.fill("short-lived", 5, 3).await;
    let (u0, u1, u2) = (h.user(0).clone(), h.user(1).clone(), h.user(2).clone());

    let view = h.lobby.leave_room(&u2, "short-lived").unwrap();
    assert_eq!(view.users, vec![u0.clone(), u1.clone()]);
    assert!(matches!(
        h.lobby.leave_room(&u2, "short-lived"),
        Err(LobbyError::NotRoomMember { .. })
    ));
    h.drain(1);

    let view = h.lobby.leave_room(&u0, "short-lived").unwrap();
    assert_eq!(view.state, RoomState::Closed);
    assert!(h.lobby.list_rooms().is_empty());
    assert!(!h.lobby.registry().is_busy(&u1));

    let msgs = h.drain(1);
    assert!(msgs.iter().any(|m| matches!(
        m.as_ref(),
        ServerMessage::RoomUpdate { reason: RoomUpdateReason::Closed, .. }
    )));
}

#[tokio::test]
async fn test_early_create_game_by_creator_is_idempotent() {
    let h = Harness::new(
        &[100, 100, 100],
        LobbyConfig::default(),
        GameConfig::default(),
        ScriptedDice::factory([6]),
    );
    let (u0, u1) = (h.user(0).clone(), h.user(1).clone());
    h.lobby.register_room(&u0, "early", 10).unwrap();

    assert!(matches!(
        h.lobby.create_game(&u0, "early").await,
        Err(LobbyError::NotEnoughPlayers { have: 1, need: 2, .. })
    ));
    h.lobby.join_room(&u1, "early").await.unwrap();
    assert!(matches!(
        h.lobby.create_game(&u1, "early").await,
        Err(LobbyError::NotRoomCreator(_))
    ));

    let outcome = h.lobby.create_game(&u0, "early").await.unwrap();
    let CreateGameOutcome::Promoted(Promotion::Started { game_id }) = outcome else {
        panic!("unexpected {outcome:?}");
    };

    let again = h.lobby.create_game(&u0, "early").await.unwrap();
    match again {
        CreateGameOutcome::Existing(view) => {
            assert_eq!(view.game_id, game_id);
            assert_eq!(view.user_ids, vec![u0.clone(), u1.clone()]);
            assert_eq!(view.pot, 20);
        }
        other => panic!("unexpected {other:?}"),
    }

    let err = h.lobby.start_game(&u0, game_id).await.unwrap_err();
    assert!(matches!(err, LobbyError::Game(GameError::IllegalAction(_))));
    let err = h
        .lobby
        .start_game(h.user(2), game_id)
        .await
        .unwrap_err();
    assert!(matches!(err, LobbyError::Game(GameError::NotAParticipant(_))));
}
