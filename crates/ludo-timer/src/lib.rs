//! Per-turn deadline timer for game sessions.
//!
//! A game session runs one [`TurnTimer`]. It is re-armed every time the
//! turn changes hands and polled inside the session's `select!` loop next
//! to the command queue:
//!
//! ```rust,ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = rx.recv() => { /* apply, then timer.arm() if the turn moved */ }
//!         expiry = timer.expired() => { /* skip the current player */ }
//!     }
//! }
//! ```
//!
//! A disarmed (or disabled) timer never completes, so the `select!` branch
//! simply stays quiet until the next `arm()`.
//!
//! The timer is driven by `tokio::time`, so tests can pause the clock and
//! advance it deterministically.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

/// Configuration for [`TurnTimer`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TurnTimerConfig {
    /// Seconds a player has to act. `0` disables the timer.
    pub turn_timeout_secs: u64,
}

impl Default for TurnTimerConfig {
    fn default() -> Self {
        Self {
            turn_timeout_secs: 30,
        }
    }
}

impl TurnTimerConfig {
    /// Shortest accepted timeout when the timer is enabled.
    pub const MIN_TIMEOUT_SECS: u64 = 5;
    /// Longest accepted timeout.
    pub const MAX_TIMEOUT_SECS: u64 = 600;

    pub fn with_timeout_secs(turn_timeout_secs: u64) -> Self {
        Self { turn_timeout_secs }
    }

    /// Clamps out-of-range values, logging a warning for each.
    pub fn validated(mut self) -> Self {
        if self.turn_timeout_secs == 0 {
            return self;
        }
        let clamped = self
            .turn_timeout_secs
            .clamp(Self::MIN_TIMEOUT_SECS, Self::MAX_TIMEOUT_SECS);
        if clamped != self.turn_timeout_secs {
            warn!(
                requested = self.turn_timeout_secs,
                clamped, "turn_timeout_secs out of range, clamping"
            );
            self.turn_timeout_secs = clamped;
        }
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.turn_timeout_secs > 0).then(|| Duration::from_secs(self.turn_timeout_secs))
    }
}

/// Fired when a turn's deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnExpiry {
    /// Which arming this expiry belongs to (1 for the first `arm()`).
    pub turn: u64,
    /// How late the wake-up was relative to the deadline.
    pub late_by: Duration,
}

/// A single re-armable deadline.
#[derive(Debug)]
pub struct TurnTimer {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    turn: u64,
}

impl TurnTimer {
    pub fn new(config: TurnTimerConfig) -> Self {
        let timeout = config.validated().timeout();
        match timeout {
            Some(t) => debug!(timeout_secs = t.as_secs(), "turn timer created"),
            None => debug!("turn timer disabled"),
        }
        Self {
            timeout,
            deadline: None,
            turn: 0,
        }
    }

    /// A timer that never fires.
    pub fn disabled() -> Self {
        Self::new(TurnTimerConfig::with_timeout_secs(0))
    }

    pub fn is_enabled(&self) -> bool {
        self.timeout.is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Starts a fresh countdown, replacing any pending one. No-op when the
    /// timer is disabled.
    pub fn arm(&mut self) {
        if let Some(timeout) = self.timeout {
            self.turn += 1;
            self.deadline = Some(Instant::now() + timeout);
        }
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Completes when the armed deadline passes, then disarms.
    ///
    /// Pends forever while disarmed. Cancel-safe: dropping the future
    /// leaves the deadline in place.
    pub async fn expired(&mut self) -> TurnExpiry {
        let Some(deadline) = self.deadline else {
            return std::future::pending().await;
        };
        time::sleep_until(deadline).await;
        self.deadline = None;
        TurnExpiry {
            turn: self.turn,
            late_by: Instant::now().saturating_duration_since(deadline),
        }
    }
}
