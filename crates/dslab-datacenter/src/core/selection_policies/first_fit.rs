//! First Fit selection.

use crate::core::selection_policy::{SelectionCandidate, SelectionPolicy};

/// Selects the first candidate.
#[derive(Default)]
pub struct FirstFitSelection;

impl FirstFitSelection {
    pub fn new() -> Self {
        Self {}
    }
}

impl<T: SelectionCandidate> SelectionPolicy<T> for FirstFitSelection {
    fn select(&mut self, candidates: &[T]) -> Option<usize> {
        if candidates.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}
