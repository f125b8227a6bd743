//! Pure board transitions.
//!
//! Every function takes the current board by reference and returns a new
//! board plus the events the transition produced. On error the caller's
//! board is untouched, which is what makes rejected commands idempotent.

use std::fmt;

use crate::board::{Board, Phase};
use crate::dice::DiceRoller;
use crate::error::GameError;
use crate::event::{GameEvent, SkipReason};
use crate::position::{
    is_safe_cell, Position, EXIT_ROLL, FINAL_HOME_INDEX, HOME_ENTRY_CELLS, PAWNS_PER_PLAYER,
    RING_LEN,
};
use crate::rules::RuleSet;

/// Why a pawn cannot move for a given roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveBlock {
    Finished,
    NeedsSix,
    Overshoot,
    Blockade,
}

impl fmt::Display for MoveBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Finished => "pawn already finished",
            Self::NeedsSix => "a six is needed to leave the barracks",
            Self::Overshoot => "roll overshoots the final home cell",
            Self::Blockade => "path is blocked by an opposing pair",
        };
        f.write_str(reason)
    }
}

/// One pawn's options for a roll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub pawn_id: u8,
    pub from: Position,
    /// Destination when the pawn can move.
    pub to: Option<Position>,
    /// Set exactly when `to` is `None`.
    pub blocked: Option<MoveBlock>,
}

impl Move {
    pub fn can_move(&self) -> bool {
        self.to.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollOutcome {
    pub value: u8,
    pub events: Vec<GameEvent>,
}

/// Moves an idle board into its first turn.
pub fn start(board: &Board) -> Result<(Board, Vec<GameEvent>), GameError> {
    if board.phase != Phase::Idle {
        return Err(GameError::IllegalAction("game already started".into()));
    }
    let mut next = board.clone();
    next.current = 0;
    next.dice.consecutive_sixes = 0;
    next.set_phase(Phase::AwaitingRoll);
    Ok((next, vec![GameEvent::GameStarted { first_seat: 0 }]))
}

/// Rolls for `seat`.
///
/// A roll with no movable pawn passes the turn straight away, as does the
/// six that reaches `rules.max_consecutive_sixes`.
pub fn roll_dice(
    board: &Board,
    seat: usize,
    rules: &RuleSet,
    dice: &mut dyn DiceRoller,
) -> Result<(Board, RollOutcome), GameError> {
    if seat != board.current || board.phase != Phase::AwaitingRoll {
        return Err(GameError::IllegalAction(format!(
            "seat {seat} cannot roll now (current seat {}, phase {:?})",
            board.current, board.phase
        )));
    }

    let value = dice.roll();
    if !(1..=6).contains(&value) {
        return Err(GameError::InvalidDiceValue(value));
    }

    let mut next = board.clone();
    let mut events = vec![GameEvent::DiceRolled { seat, value }];

    if value == EXIT_ROLL {
        next.dice.consecutive_sixes = next.dice.consecutive_sixes.saturating_add(1);
    } else {
        next.dice.consecutive_sixes = 0;
    }

    let cap = rules.max_consecutive_sixes;
    if value == EXIT_ROLL && cap > 0 && next.dice.consecutive_sixes >= cap {
        events.push(GameEvent::TurnForfeited {
            seat,
            consecutive_sixes: next.dice.consecutive_sixes,
        });
        pass_turn(&mut next, &mut events);
        return Ok((next, RollOutcome { value, events }));
    }

    let movable = compute_valid_moves(&next, seat, value, rules)
        .iter()
        .any(Move::can_move);
    if movable {
        next.set_phase(Phase::AwaitingMove);
        next.dice.value = Some(value);
    } else {
        events.push(GameEvent::TurnSkipped {
            seat,
            reason: SkipReason::NoValidMoves,
        });
        pass_turn(&mut next, &mut events);
    }

    Ok((next, RollOutcome { value, events }))
}

/// Lists every pawn of `seat` with its destination for `value`, or the
/// reason it cannot move.
pub fn compute_valid_moves(board: &Board, seat: usize, value: u8, rules: &RuleSet) -> Vec<Move> {
    let Some(player) = board.players.get(seat) else {
        return Vec::new();
    };
    player
        .pawns
        .iter()
        .map(|pawn| match destination(board, seat, pawn.position, value, rules) {
            Ok(to) => Move {
                pawn_id: pawn.id,
                from: pawn.position,
                to: Some(to),
                blocked: None,
            },
            Err(block) => Move {
                pawn_id: pawn.id,
                from: pawn.position,
                to: None,
                blocked: Some(block),
            },
        })
        .collect()
}

/// Walks `value` steps from `from` along `seat`'s path.
fn destination(
    board: &Board,
    seat: usize,
    from: Position,
    value: u8,
    rules: &RuleSet,
) -> Result<Position, MoveBlock> {
    let start_cell = board.players[seat].start_cell;
    match from {
        Position::Finished => Err(MoveBlock::Finished),
        Position::Barracks if value != EXIT_ROLL => Err(MoveBlock::NeedsSix),
        Position::Barracks => {
            if rules.blocking && board.blocked_for(seat, start_cell) {
                return Err(MoveBlock::Blockade);
            }
            Ok(Position::Track(start_cell))
        }
        Position::Track(_) | Position::HomeStretch(_) => {
            let entry = HOME_ENTRY_CELLS[seat];
            let mut pos = from;
            for _ in 0..value {
                pos = match pos {
                    Position::Track(cell) if cell == entry => Position::HomeStretch(0),
                    Position::Track(cell) => Position::Track((cell + 1) % RING_LEN),
                    Position::HomeStretch(i) if i < FINAL_HOME_INDEX => Position::HomeStretch(i + 1),
                    _ => return Err(MoveBlock::Overshoot),
                };
                if let Position::Track(cell) = pos {
                    if rules.blocking && board.blocked_for(seat, cell) {
                        return Err(MoveBlock::Blockade);
                    }
                }
            }
            if pos == Position::HomeStretch(FINAL_HOME_INDEX) {
                pos = Position::Finished;
            }
            Ok(pos)
        }
    }
}

/// Moves `pawn_id` of `seat` by the pending dice value.
pub fn apply_move(
    board: &Board,
    seat: usize,
    pawn_id: u8,
    rules: &RuleSet,
) -> Result<(Board, Vec<GameEvent>), GameError> {
    let value = match board.dice.value {
        Some(v) if seat == board.current && board.phase == Phase::AwaitingMove => v,
        _ => {
            return Err(GameError::IllegalAction(format!(
                "seat {seat} has no pending roll to move with"
            )));
        }
    };
    if usize::from(pawn_id) >= PAWNS_PER_PLAYER {
        return Err(GameError::IllegalMove {
            pawn_id,
            reason: "no such pawn".into(),
        });
    }

    let from = board.players[seat].pawns[usize::from(pawn_id)].position;
    let to = destination(board, seat, from, value, rules).map_err(|block| {
        GameError::IllegalMove {
            pawn_id,
            reason: block.to_string(),
        }
    })?;

    let mut next = board.clone();
    next.players[seat].pawns[usize::from(pawn_id)].position = to;
    let mut events = vec![GameEvent::PawnMoved {
        seat,
        pawn_id,
        from: from.encode(seat),
        to: to.encode(seat),
    }];

    let mut captured = false;
    if let Position::Track(cell) = to {
        if !is_safe_cell(cell) {
            for (victim_seat, victim_pawn_id) in next.opponents_on(seat, cell) {
                next.players[victim_seat].pawns[usize::from(victim_pawn_id)].position =
                    Position::Barracks;
                events.push(GameEvent::Capture {
                    seat,
                    pawn_id,
                    victim_seat,
                    victim_pawn_id,
                    cell,
                });
                captured = true;
            }
        }
    }

    let finished = to == Position::Finished;
    if finished {
        events.push(GameEvent::PawnFinished { seat, pawn_id });
    }

    if next.players[seat].has_won() {
        events.push(GameEvent::PlayerWon { seat });
        next.set_phase(Phase::Finished);
        return Ok((next, events));
    }

    let bonus = (value == EXIT_ROLL && rules.bonus_on_six)
        || (captured && rules.bonus_on_capture)
        || (finished && rules.bonus_on_finish);
    if bonus {
        if value != EXIT_ROLL {
            next.dice.consecutive_sixes = 0;
        }
        events.push(GameEvent::BonusRoll { seat });
        next.set_phase(Phase::AwaitingRoll);
    } else {
        pass_turn(&mut next, &mut events);
    }

    Ok((next, events))
}

/// Ends `seat`'s turn without moving.
pub fn skip_turn(
    board: &Board,
    seat: usize,
    reason: SkipReason,
) -> Result<(Board, Vec<GameEvent>), GameError> {
    let in_turn = matches!(board.phase, Phase::AwaitingRoll | Phase::AwaitingMove);
    if seat != board.current || !in_turn {
        return Err(GameError::IllegalAction(format!(
            "seat {seat} has no turn to skip"
        )));
    }
    let mut next = board.clone();
    let mut events = vec![GameEvent::TurnSkipped { seat, reason }];
    pass_turn(&mut next, &mut events);
    Ok((next, events))
}

/// Removes `seat` from rotation for the rest of the game.
///
/// Its pawns return to the barracks. When a single player is left in
/// rotation, that player wins.
pub fn forfeit(board: &Board, seat: usize) -> Result<(Board, Vec<GameEvent>), GameError> {
    let in_play = matches!(board.phase, Phase::AwaitingRoll | Phase::AwaitingMove);
    let Some(player) = board.players.get(seat) else {
        return Err(GameError::IllegalAction(format!("no seat {seat}")));
    };
    if !in_play || !player.eligible {
        return Err(GameError::IllegalAction(format!(
            "seat {seat} cannot forfeit now"
        )));
    }

    let mut next = board.clone();
    let player = &mut next.players[seat];
    player.eligible = false;
    for pawn in player.pawns.iter_mut().filter(|p| !p.is_finished()) {
        pawn.position = Position::Barracks;
    }
    let mut events = vec![GameEvent::PlayerForfeited { seat }];

    if next.players_in_rotation() == 1 {
        if let Some(winner) = next.players.iter().position(|p| p.in_rotation()) {
            next.current = winner;
            events.push(GameEvent::PlayerWon { seat: winner });
            next.set_phase(Phase::Finished);
            return Ok((next, events));
        }
    }

    if seat == next.current {
        pass_turn(&mut next, &mut events);
    }
    Ok((next, events))
}

fn pass_turn(board: &mut Board, events: &mut Vec<GameEvent>) {
    let from = board.current;
    let to = board.next_seat_after(from).unwrap_or(from);
    board.current = to;
    board.dice.consecutive_sixes = 0;
    board.set_phase(Phase::AwaitingRoll);
    events.push(GameEvent::TurnPassed { from, to });
}
