//! Board geometry and the wire encoding of pawn positions.
//!
//! The ring has 52 shared cells numbered 0–51. Each seat has a fixed start
//! cell (where pawns leave the barracks), a fixed home-entry cell (the last
//! ring cell before its private home stretch) and a 6-cell home stretch.
//!
//! Positions travel on the wire as a single signed number:
//!
//! ```text
//!   -1            barracks
//!   -2            finished
//!    0..=51       ring cell
//!   52 + 6*s + i  home stretch index i of seat s (52..=75)
//! ```

/// Number of shared ring cells.
pub const RING_LEN: u8 = 52;

/// Length of each private home stretch.
pub const HOME_STRETCH_LEN: u8 = 6;

/// Index of the last home-stretch cell. Landing here finishes the pawn.
pub const FINAL_HOME_INDEX: u8 = HOME_STRETCH_LEN - 1;

/// Seats around the board.
pub const MAX_SEATS: usize = 4;

pub const PAWNS_PER_PLAYER: usize = 4;

/// The roll a pawn needs to leave the barracks.
pub const EXIT_ROLL: u8 = 6;

/// Ring cell where each seat's pawns enter play.
pub const START_CELLS: [u8; MAX_SEATS] = [50, 11, 24, 37];

/// Ring cell after which each seat's pawns turn into their home stretch.
pub const HOME_ENTRY_CELLS: [u8; MAX_SEATS] = [51, 12, 25, 38];

/// Ring cells where captures cannot happen.
pub const SAFE_CELLS: [u8; 8] = [1, 8, 14, 21, 27, 34, 40, 47];

pub const BARRACKS_CODE: i16 = -1;
pub const FINISHED_CODE: i16 = -2;
const HOME_STRETCH_BASE: i16 = RING_LEN as i16;

/// Logical position of a pawn. The variants are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    Barracks,
    Track(u8),
    HomeStretch(u8),
    Finished,
}

impl Position {
    /// Encodes the position for `seat` using the wire numbering.
    pub fn encode(self, seat: usize) -> i16 {
        match self {
            Self::Barracks => BARRACKS_CODE,
            Self::Finished => FINISHED_CODE,
            Self::Track(cell) => i16::from(cell),
            Self::HomeStretch(i) => {
                HOME_STRETCH_BASE
                    + (seat as i16) * i16::from(HOME_STRETCH_LEN)
                    + i16::from(i)
            }
        }
    }

    /// The ring cell this position occupies, if any.
    pub fn ring_cell(self) -> Option<u8> {
        match self {
            Self::Track(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn is_safe(self) -> bool {
        self.ring_cell().is_some_and(is_safe_cell)
    }

    pub fn is_home_stretch(self) -> bool {
        matches!(self, Self::HomeStretch(_))
    }
}

pub fn is_safe_cell(cell: u8) -> bool {
    SAFE_CELLS.contains(&cell)
}
