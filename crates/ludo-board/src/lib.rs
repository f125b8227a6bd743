//! Board engine and turn state machine for Ludo.
//!
//! This crate is pure game logic: no I/O, no async, no clocks except the
//! creation/completion timestamps stamped on [`Game`]. Everything above
//! it (sessions, rooms, the gateway) treats it as the single source of
//! truth for what a legal move is.
//!
//! # Layers
//!
//! ```text
//! Game (aggregate root: lifecycle, winner, pot, settlement)
//!   └─ TurnMachine (who may act, what action is expected)
//!        └─ engine (pure Board → Board transitions)
//! ```
//!
//! All transitions are computed on a copy of the board and committed only
//! when they succeed, so a rejected command never leaves a half-applied
//! move behind.

mod board;
mod dice;
pub mod engine;
mod error;
mod event;
mod game;
mod ids;
pub mod position;
mod rules;
mod turn;
mod view;

pub use board::{Board, Color, Dice, Pawn, Phase, Player};
pub use dice::{random_dice_factory, DiceFactory, DiceRoller, RandomDice, ScriptedDice};
pub use engine::{Move, MoveBlock, RollOutcome};
pub use error::GameError;
pub use event::{GameEvent, SkipReason};
pub use game::{Game, GameState, Settlement};
pub use ids::{GameId, UserId};
pub use position::Position;
pub use rules::RuleSet;
pub use turn::{Action, TurnMachine};
pub use view::{BoardView, DiceView, GameView, MoveView, PawnView, PlayerView};
