//! Wallet settlement for staked games.
//!
//! The server never owns money; it asks a [`Wallet`] to move it. Two
//! moments touch the wallet:
//!
//! - **Escrow** when a room is promoted: each member's stake is debited.
//! - **Payout** when a game finishes: the pot is credited to the winner.
//!
//! Both are awaited outside any game session's command loop.
//!
//! [`InMemoryWallet`] is a process-local ledger for development and tests.

mod error;
mod memory;

pub use error::WalletError;
pub use memory::InMemoryWallet;

use ludo_board::UserId;

/// Balance operations the server needs from a wallet service.
///
/// Amounts are integer minor units. Every mutating call returns the
/// balance after the operation.
///
/// Methods return `impl Future + Send` so the futures can be awaited from
/// spawned tasks.
pub trait Wallet: Send + Sync + 'static {
    /// Opens a wallet. Opening an existing wallet leaves it unchanged and
    /// returns its balance.
    fn create(
        &self,
        user: &UserId,
        initial_balance: i64,
    ) -> impl std::future::Future<Output = Result<i64, WalletError>> + Send;

    fn balance(
        &self,
        user: &UserId,
    ) -> impl std::future::Future<Output = Result<i64, WalletError>> + Send;

    fn credit(
        &self,
        user: &UserId,
        amount: i64,
    ) -> impl std::future::Future<Output = Result<i64, WalletError>> + Send;

    /// Fails with [`WalletError::InsufficientFunds`] without touching the
    /// balance when it would go negative.
    fn debit(
        &self,
        user: &UserId,
        amount: i64,
    ) -> impl std::future::Future<Output = Result<i64, WalletError>> + Send;

    fn has_sufficient(
        &self,
        user: &UserId,
        amount: i64,
    ) -> impl std::future::Future<Output = Result<bool, WalletError>> + Send;
}
