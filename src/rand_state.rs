//! Seedable, checkpointable random state shared by the oracles.
//!
//! Notes:
//! - Seeded construction is the only construction: the same seed and the
//!   same call sequence always yield the same candidates.
//! - The stream position is part of the checkpoint, so a restored manager
//!   continues the exact draw sequence of the one that was saved.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone)]
pub struct RandState {
    seed: u64,
    rng: ChaCha8Rng,
}

impl RandState {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Rebuild a state at a saved stream position.
    pub fn at_position(seed: u64, word_pos: u128) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_word_pos(word_pos);
        Self { seed, rng }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Current stream position (in 32-bit words).
    pub fn word_pos(&self) -> u128 {
        self.rng.get_word_pos()
    }

    /// Uniform draw in `[0, 1)`.
    pub fn get_and_update_random(&mut self) -> f32 {
        self.rng.gen::<f32>()
    }
}

impl PartialEq for RandState {
    fn eq(&self, other: &Self) -> bool {
        self.seed == other.seed && self.word_pos() == other.word_pos()
    }
}

impl Default for RandState {
    fn default() -> Self {
        Self::new(0)
    }
}
