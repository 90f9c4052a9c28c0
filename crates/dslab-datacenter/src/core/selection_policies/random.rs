//! Random selection.

use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::core::selection_policy::{SelectionCandidate, SelectionPolicy};

/// Selects a uniformly random candidate using its own seeded generator.
pub struct RandomSelection {
    rand: Pcg64,
}

impl RandomSelection {
    pub fn new(seed: u64) -> Self {
        Self {
            rand: Pcg64::seed_from_u64(seed),
        }
    }
}

impl<T: SelectionCandidate> SelectionPolicy<T> for RandomSelection {
    fn select(&mut self, candidates: &[T]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        Some(self.rand.gen_range(0..candidates.len()))
    }
}
