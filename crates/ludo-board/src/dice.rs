//! Dice sources.
//!
//! The engine never reads a die value from a client. Production games
//! draw from [`RandomDice`], an OS-seeded CSPRNG; tests and replays use
//! [`ScriptedDice`].

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Something that produces die faces in `1..=6`.
pub trait DiceRoller {
    fn roll(&mut self) -> u8;
}

/// Builds one roller per game session.
pub type DiceFactory = Arc<dyn Fn() -> Box<dyn DiceRoller + Send> + Send + Sync>;

/// A factory producing independently seeded [`RandomDice`].
pub fn random_dice_factory() -> DiceFactory {
    Arc::new(|| Box::new(RandomDice::new()))
}

/// Cryptographically seeded dice. Each instance is seeded from the OS,
/// so no value a client has seen helps predict the next roll.
pub struct RandomDice {
    rng: StdRng,
}

impl RandomDice {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }
}

impl Default for RandomDice {
    fn default() -> Self {
        Self::new()
    }
}

impl DiceRoller for RandomDice {
    fn roll(&mut self) -> u8 {
        self.rng.random_range(1..=6)
    }
}

/// Replays a fixed sequence of faces, starting over when it runs out.
#[derive(Debug, Clone)]
pub struct ScriptedDice {
    faces: Vec<u8>,
    next: usize,
}

impl ScriptedDice {
    /// An empty script rolls 1 forever.
    pub fn new(faces: impl IntoIterator<Item = u8>) -> Self {
        let mut faces: Vec<u8> = faces.into_iter().collect();
        if faces.is_empty() {
            faces.push(1);
        }
        Self { faces, next: 0 }
    }

    /// A factory that hands every session its own copy of the script.
    pub fn factory(faces: impl IntoIterator<Item = u8>) -> DiceFactory {
        let script = Self::new(faces);
        Arc::new(move || Box::new(script.clone()))
    }
}

impl DiceRoller for ScriptedDice {
    fn roll(&mut self) -> u8 {
        let face = self.faces[self.next % self.faces.len()];
        self.next += 1;
        face
    }
}
