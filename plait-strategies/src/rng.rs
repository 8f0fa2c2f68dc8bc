//! Seeded pseudo-random value generation
//!
//! The [`ValueGenerator`] is the single source of nondeterminism for the
//! whole engine. Strategies must never consult system randomness, time, or
//! thread identity; everything flows through this seeded generator so that
//! an iteration is reproducible from its seed alone.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Deterministic uniform int/bool generator
#[derive(Debug)]
pub struct ValueGenerator {
    seed: u64,
    rng: StdRng,
}

impl ValueGenerator {
    /// Create a generator from an iteration seed
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The seed this generator was created with
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform integer in `[0, bound)`; returns 0 when `bound` is 0 or 1
    pub fn next_int(&mut self, bound: u32) -> u32 {
        if bound <= 1 {
            return 0;
        }
        self.rng.gen_range(0..bound)
    }

    /// Uniform boolean
    pub fn next_bool(&mut self) -> bool {
        self.rng.gen()
    }
}
