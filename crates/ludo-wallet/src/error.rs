use ludo_board::UserId;

/// Errors returned by [`Wallet`](crate::Wallet) implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("insufficient funds for {user}: needed {needed}, available {available}")]
    InsufficientFunds {
        user: UserId,
        needed: i64,
        available: i64,
    },

    #[error("no wallet for {0}")]
    NotFound(UserId),

    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),

    /// The wallet service could not be reached or failed internally.
    #[error("wallet unavailable: {0}")]
    Unavailable(String),
}
