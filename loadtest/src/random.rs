//! Random sources for the probabilistic parts of a workload.
//!
//! Every virtual user owns its own source, so draws are never correlated across users and no
//! generator is shared between tasks.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// A source of uniformly distributed numbers in `[0, 1)`.
pub trait RandomSource: Send {
    /// Returns the next uniform draw in `[0, 1)`.
    fn next_f64(&mut self) -> f64;
}

impl RandomSource for SmallRng {
    fn next_f64(&mut self) -> f64 {
        self.random()
    }
}

/// Creates the random source for the virtual user with the given id.
///
/// With a seed, user `id` is seeded with `seed + id`, which makes runs reproducible. Without a
/// seed, the source is seeded from the thread-local generator.
pub fn for_vu(seed: Option<u64>, id: usize) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(id as u64)),
        None => SmallRng::from_rng(&mut rand::rng()),
    }
}

/// Performs a Bernoulli trial that succeeds with probability `p`.
pub fn bernoulli(source: &mut dyn RandomSource, p: f64) -> bool {
    source.next_f64() < p
}

/// A source replaying a fixed sequence of values in a cycle.
///
/// Use this to make tests deterministic.
#[derive(Clone, Debug)]
pub struct Sequence {
    values: Vec<f64>,
    position: usize,
}

impl Sequence {
    /// Creates a source that yields `values` in order, starting over after the last one.
    ///
    /// An empty sequence always yields `0.0`.
    pub fn new(values: impl Into<Vec<f64>>) -> Self {
        Self {
            values: values.into(),
            position: 0,
        }
    }
}

impl RandomSource for Sequence {
    fn next_f64(&mut self) -> f64 {
        let Some(&value) = self.values.get(self.position) else {
            return 0.0;
        };
        self.position = (self.position + 1) % self.values.len();
        value
    }
}
