//! Maximum Usage selection.

use crate::core::selection_policy::{argmax_by, SelectionCandidate, SelectionPolicy};

/// Selects the candidate with the highest CPU usage in MIPS. Ties are resolved in favor of the earlier candidate.
#[derive(Default)]
pub struct MaximumUsageSelection;

impl MaximumUsageSelection {
    pub fn new() -> Self {
        Self {}
    }
}

impl<T: SelectionCandidate> SelectionPolicy<T> for MaximumUsageSelection {
    fn select(&mut self, candidates: &[T]) -> Option<usize> {
        argmax_by(candidates, |c| c.usage())
    }
}
