//! Pre-game room records.

use std::time::Instant;

use ludo_board::{GameId, UserId};
use ludo_protocol::{RoomId, RoomState, RoomView};

/// A named group of players waiting for a game, each staking
/// `bet_amount`.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub creator: UserId,
    /// Join order; becomes seat order on promotion.
    pub members: Vec<UserId>,
    pub bet_amount: i64,
    pub state: RoomState,
    pub game_id: Option<GameId>,
    pub last_activity: Instant,
}

impl Room {
    pub fn new(id: RoomId, name: String, creator: UserId, bet_amount: i64) -> Self {
        Self {
            id,
            name,
            members: vec![creator.clone()],
            creator,
            bet_amount,
            state: RoomState::Open,
            game_id: None,
            last_activity: Instant::now(),
        }
    }

    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    /// Stake times members.
    pub fn pot(&self) -> i64 {
        self.bet_amount.saturating_mul(self.members.len() as i64)
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_idle(&self, now: Instant, max_idle: std::time::Duration) -> bool {
        self.state == RoomState::Open && now.saturating_duration_since(self.last_activity) > max_idle
    }

    /// Removes `user`, handing the room to the next member in join order
    /// if they created it.
    pub(crate) fn remove_member(&mut self, user: &UserId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != user);
        if self.creator == *user {
            if let Some(next) = self.members.first() {
                self.creator = next.clone();
            }
        }
        self.members.len() != before
    }

    pub fn view(&self, max_players: usize) -> RoomView {
        RoomView {
            id: self.id,
            name: self.name.clone(),
            creator_id: self.creator.clone(),
            users: self.members.clone(),
            bet_amount: self.bet_amount,
            total_bet_amount: self.pot(),
            game_id: self.game_id,
            state: self.state,
            player_count: self.members.len(),
            max_players,
        }
    }
}
