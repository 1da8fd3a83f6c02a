//! Index sampling for shortest-of-2 dispatch and spine probing.

use std::collections::VecDeque;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Draws indices uniformly from `[0, bound)`.
pub trait IndexSampler: Send {
    /// `bound` is always at least 1.
    fn sample(&mut self, bound: u16) -> u16;
}

/// Sampler backed by a `rand` generator.
#[derive(Debug, Clone)]
pub struct RngSampler<R> {
    rng: R,
}

impl RngSampler<ChaCha8Rng> {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self::seeded(rand::random())
    }
}

impl<R: Rng + Send> IndexSampler for RngSampler<R> {
    fn sample(&mut self, bound: u16) -> u16 {
        self.rng.random_range(0..bound.max(1))
    }
}

/// Replays a fixed sequence of indices, each reduced modulo the bound.
/// Falls back to 0 once the script runs out.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSampler {
    script: VecDeque<u16>,
}

impl ScriptedSampler {
    pub fn new(script: impl IntoIterator<Item = u16>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl IndexSampler for ScriptedSampler {
    fn sample(&mut self, bound: u16) -> u16 {
        self.script.pop_front().unwrap_or(0) % bound.max(1)
    }
}
