//! Process-wide lookup tables for rooms and games.
//!
//! Every map is a `DashMap`, so each operation locks a single entry (or
//! shard) and never the whole registry. Lock order, where two maps are
//! touched together, is always `rooms` before any user index.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ludo_board::{Game, GameId, GameView, UserId};
use ludo_protocol::RoomId;
use tracing::{debug, info};

use crate::room::Room;
use crate::session::GameHandle;

#[derive(Default)]
pub struct SessionRegistry {
    pub(crate) rooms: DashMap<RoomId, Room>,
    room_names: DashMap<String, RoomId>,
    /// Room name to the game it was promoted into.
    room_games: DashMap<String, GameId>,
    games: DashMap<GameId, GameHandle>,
    user_rooms: DashMap<UserId, RoomId>,
    user_games: DashMap<UserId, GameId>,
    archive: DashMap<GameId, Game>,
    /// Promoted games still waiting for `start_game`, with when they were
    /// created and the stake each player has escrowed.
    unstarted: DashMap<GameId, (Instant, i64)>,
    next_room_id: AtomicU64,
    next_game_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_room_id(&self) -> RoomId {
        RoomId(self.next_room_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn next_game_id(&self) -> GameId {
        GameId(self.next_game_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    // -- rooms --------------------------------------------------------------

    pub fn room_id(&self, name: &str) -> Option<RoomId> {
        self.room_names.get(name).map(|id| *id)
    }

    pub fn room(&self, id: RoomId) -> Option<Room> {
        self.rooms.get(&id).map(|r| r.clone())
    }

    /// Reserves `name` for `id`. Fails if an open room already uses it.
    pub(crate) fn claim_name(&self, name: &str, id: RoomId) -> bool {
        match self.room_names.entry(name.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(id);
                true
            }
        }
    }

    pub(crate) fn insert_room(&self, room: Room) {
        debug!(room_id = %room.id, name = %room.name, "room registered");
        self.rooms.insert(room.id, room);
    }

    /// Drops a room and every index entry pointing at it.
    pub(crate) fn remove_room(&self, id: RoomId) -> Option<Room> {
        let (_, room) = self.rooms.remove(&id)?;
        self.room_names.remove_if(&room.name, |_, rid| *rid == id);
        for member in &room.members {
            self.user_rooms.remove_if(member, |_, rid| *rid == id);
        }
        Some(room)
    }

    pub fn rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|r| r.clone()).collect();
        rooms.sort_by_key(|r| r.id.0);
        rooms
    }

    // -- user indexes -------------------------------------------------------

    /// Records `user` as sitting in room `id`, unless they already sit in
    /// some room.
    pub(crate) fn claim_user_room(&self, user: &UserId, id: RoomId) -> bool {
        match self.user_rooms.entry(user.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(id);
                true
            }
        }
    }

    pub(crate) fn release_user_room(&self, user: &UserId, id: RoomId) {
        self.user_rooms.remove_if(user, |_, rid| *rid == id);
    }

    pub fn user_room(&self, user: &UserId) -> Option<RoomId> {
        self.user_rooms.get(user).map(|id| *id)
    }

    /// The live game `user` is playing in.
    pub fn user_game(&self, user: &UserId) -> Option<GameId> {
        self.user_games.get(user).map(|id| *id)
    }

    /// Sitting in an open room or playing a live game.
    pub fn is_busy(&self, user: &UserId) -> bool {
        self.user_rooms.contains_key(user) || self.user_games.contains_key(user)
    }

    // -- games --------------------------------------------------------------

    /// Registers a live game for its participants and the room it came
    /// from.
    pub(crate) fn insert_game(&self, room_name: &str, handle: GameHandle) {
        let game_id = handle.game_id();
        for user in handle.participants() {
            self.user_games.insert(user.clone(), game_id);
        }
        self.room_games.insert(room_name.to_owned(), game_id);
        self.games.insert(game_id, handle);
        info!(%game_id, room = room_name, "game registered");
    }

    pub fn game(&self, id: GameId) -> Option<GameHandle> {
        self.games.get(&id).map(|h| h.clone())
    }

    /// The game a room was promoted into.
    pub fn room_game(&self, room_name: &str) -> Option<GameId> {
        self.room_games.get(room_name).map(|id| *id)
    }

    pub fn live_games(&self) -> usize {
        self.games.len()
    }

    /// Moves a finished game out of the live tables.
    pub(crate) fn archive(&self, game: Game) {
        let game_id = game.id();
        for user in game.user_ids() {
            self.user_games.remove_if(user, |_, gid| *gid == game_id);
        }
        self.games.remove(&game_id);
        self.unstarted.remove(&game_id);
        self.room_games.retain(|_, gid| *gid != game_id);
        self.archive.insert(game_id, game);
        info!(%game_id, "game archived");
    }

    pub fn archived(&self, id: GameId) -> Option<GameView> {
        self.archive.get(&id).map(|g| g.view())
    }

    pub(crate) fn await_start(&self, id: GameId, stake: i64, now: Instant) {
        self.unstarted.insert(id, (now, stake));
    }

    pub(crate) fn mark_started(&self, id: GameId) {
        self.unstarted.remove(&id);
    }

    /// Unstarted games created more than `max_idle` ago, with their
    /// per-player stake.
    pub(crate) fn stale_unstarted(&self, now: Instant, max_idle: Duration) -> Vec<(GameId, i64)> {
        self.unstarted
            .iter()
            .filter(|e| now.saturating_duration_since(e.value().0) > max_idle)
            .map(|e| (*e.key(), e.value().1))
            .collect()
    }

    /// Forgets a game that ended without a result.
    pub(crate) fn drop_game(&self, id: GameId) -> Option<GameHandle> {
        self.unstarted.remove(&id);
        self.room_games.retain(|_, gid| *gid != id);
        let (_, handle) = self.games.remove(&id)?;
        for user in handle.participants() {
            self.user_games.remove_if(user, |_, gid| *gid == id);
        }
        info!(game_id = %id, "game dropped");
        Some(handle)
    }

    // -- maintenance --------------------------------------------------------

    /// Removes open rooms idle for longer than `max_idle` and returns them.
    pub fn sweep_idle(&self, now: Instant, max_idle: Duration) -> Vec<Room> {
        let stale: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|r| r.is_idle(now, max_idle))
            .map(|r| r.id)
            .collect();

        let mut swept = Vec::with_capacity(stale.len());
        for id in stale {
            // Re-check under removal: the room may have seen activity since.
            if let Some((_, room)) = self.rooms.remove_if(&id, |_, r| r.is_idle(now, max_idle)) {
                self.room_names.remove_if(&room.name, |_, rid| *rid == id);
                for member in &room.members {
                    self.user_rooms.remove_if(member, |_, rid| *rid == id);
                }
                info!(room_id = %id, name = %room.name, "idle room swept");
                swept.push(room);
            }
        }
        swept
    }
}
