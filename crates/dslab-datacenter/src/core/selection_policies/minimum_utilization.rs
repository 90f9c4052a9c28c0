//! Minimum Utilization selection.

use crate::core::selection_policy::{argmax_by, SelectionCandidate, SelectionPolicy};

/// Selects the candidate with the lowest CPU usage relative to its capacity.
#[derive(Default)]
pub struct MinimumUtilizationSelection;

impl MinimumUtilizationSelection {
    pub fn new() -> Self {
        Self {}
    }
}

impl<T: SelectionCandidate> SelectionPolicy<T> for MinimumUtilizationSelection {
    fn select(&mut self, candidates: &[T]) -> Option<usize> {
        argmax_by(candidates, |c| -c.utilization())
    }
}
