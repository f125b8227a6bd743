use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ludo_board::UserId;
use tracing::debug;

use crate::{Wallet, WalletError};

/// A ledger kept in a concurrent map, one entry per user.
///
/// Each operation holds only its user's entry guard, so escrows for
/// different users never contend.
#[derive(Debug, Default)]
pub struct InMemoryWallet {
    balances: DashMap<UserId, i64>,
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds balances, e.g. for tests.
    pub fn with_balances(balances: impl IntoIterator<Item = (UserId, i64)>) -> Self {
        Self {
            balances: balances.into_iter().collect(),
        }
    }

    fn positive(amount: i64) -> Result<i64, WalletError> {
        if amount <= 0 {
            return Err(WalletError::InvalidAmount(amount));
        }
        Ok(amount)
    }
}

impl Wallet for InMemoryWallet {
    async fn create(&self, user: &UserId, initial_balance: i64) -> Result<i64, WalletError> {
        if initial_balance < 0 {
            return Err(WalletError::InvalidAmount(initial_balance));
        }
        match self.balances.entry(user.clone()) {
            Entry::Occupied(e) => Ok(*e.get()),
            Entry::Vacant(e) => {
                debug!(%user, initial_balance, "wallet created");
                e.insert(initial_balance);
                Ok(initial_balance)
            }
        }
    }

    async fn balance(&self, user: &UserId) -> Result<i64, WalletError> {
        self.balances
            .get(user)
            .map(|b| *b)
            .ok_or_else(|| WalletError::NotFound(user.clone()))
    }

    async fn credit(&self, user: &UserId, amount: i64) -> Result<i64, WalletError> {
        let amount = Self::positive(amount)?;
        let mut balance = self
            .balances
            .get_mut(user)
            .ok_or_else(|| WalletError::NotFound(user.clone()))?;
        *balance = balance.saturating_add(amount);
        debug!(%user, amount, balance = *balance, "wallet credited");
        Ok(*balance)
    }

    async fn debit(&self, user: &UserId, amount: i64) -> Result<i64, WalletError> {
        let amount = Self::positive(amount)?;
        let mut balance = self
            .balances
            .get_mut(user)
            .ok_or_else(|| WalletError::NotFound(user.clone()))?;
        if *balance < amount {
            return Err(WalletError::InsufficientFunds {
                user: user.clone(),
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        debug!(%user, amount, balance = *balance, "wallet debited");
        Ok(*balance)
    }

    async fn has_sufficient(&self, user: &UserId, amount: i64) -> Result<bool, WalletError> {
        let amount = Self::positive(amount)?;
        Ok(self.balance(user).await? >= amount)
    }
}
