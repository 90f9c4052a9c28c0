//! Selection policies used by migration-aware allocation.

use serde::Serialize;

use crate::core::config::options::{parse_config_value, parse_options};
use crate::core::error::ConfigurationError;
use crate::core::selection_policies::first_fit::FirstFitSelection;
use crate::core::selection_policies::maximum_usage::MaximumUsageSelection;
use crate::core::selection_policies::minimum_utilization::MinimumUtilizationSelection;
use crate::core::selection_policies::random::RandomSelection;

/// Something a selection policy can choose from.
pub trait SelectionCandidate {
    fn id(&self) -> u32;

    /// Absolute CPU usage in MIPS.
    fn usage(&self) -> f64;

    /// CPU usage relative to capacity.
    fn utilization(&self) -> f64;
}

/// Guest which can be migrated away from an overloaded host.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GuestCandidate {
    pub id: u32,
    pub host_id: u32,
    pub allocated_mips: f64,
    pub capacity_mips: f64,
}

impl SelectionCandidate for GuestCandidate {
    fn id(&self) -> u32 {
        self.id
    }

    fn usage(&self) -> f64 {
        self.allocated_mips
    }

    fn utilization(&self) -> f64 {
        if self.capacity_mips == 0. {
            return 0.;
        }
        self.allocated_mips / self.capacity_mips
    }
}

/// Host which can accept a guest.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HostCandidate {
    pub id: u32,
    pub used_mips: f64,
    pub total_mips: f64,
}

impl SelectionCandidate for HostCandidate {
    fn id(&self) -> u32 {
        self.id
    }

    fn usage(&self) -> f64 {
        self.used_mips
    }

    fn utilization(&self) -> f64 {
        if self.total_mips == 0. {
            return 0.;
        }
        self.used_mips / self.total_mips
    }
}

/// Chooses one of the candidates, returns its index or `None` if there are no candidates.
pub trait SelectionPolicy<T: SelectionCandidate> {
    fn select(&mut self, candidates: &[T]) -> Option<usize>;
}

/// Creates selection policy from a config string like `FirstFit` or `Random[seed=7]`.
pub fn selection_policy_resolver<T: SelectionCandidate + 'static>(
    config_str: &str,
) -> Result<Box<dyn SelectionPolicy<T>>, ConfigurationError> {
    let (name, options) = parse_config_value(config_str.trim());
    match name.as_str() {
        "FirstFit" => Ok(Box::new(FirstFitSelection::new())),
        "MaximumUsage" => Ok(Box::new(MaximumUsageSelection::new())),
        "MinimumUtilization" => Ok(Box::new(MinimumUtilizationSelection::new())),
        "Random" => {
            let seed = match options {
                Some(options) => match parse_options(&options).get("seed") {
                    Some(seed) => seed.trim().parse::<u64>().map_err(|_| ConfigurationError::InvalidOption {
                        config: config_str.to_string(),
                        option: format!("seed={}", seed),
                    })?,
                    None => {
                        return Err(ConfigurationError::InvalidOption {
                            config: config_str.to_string(),
                            option: options,
                        })
                    }
                },
                None => 123,
            };
            Ok(Box::new(RandomSelection::new(seed)))
        }
        _ => Err(ConfigurationError::UnknownSelectionPolicy(config_str.to_string())),
    }
}

/// Returns index of the first candidate with the maximal key.
pub(crate) fn argmax_by<T, F: Fn(&T) -> f64>(candidates: &[T], key: F) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let value = key(candidate);
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((i, value)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guests(usage: &[f64]) -> Vec<GuestCandidate> {
        usage
            .iter()
            .enumerate()
            .map(|(i, &u)| GuestCandidate {
                id: i as u32,
                host_id: 0,
                allocated_mips: u,
                capacity_mips: 1000.,
            })
            .collect()
    }

    #[test]
    fn test_resolver() {
        let candidates = guests(&[100., 300., 300., 50.]);
        let mut first = selection_policy_resolver::<GuestCandidate>("FirstFit").unwrap();
        assert_eq!(first.select(&candidates), Some(0));
        let mut max = selection_policy_resolver::<GuestCandidate>("MaximumUsage").unwrap();
        assert_eq!(max.select(&candidates), Some(1));
        let mut min = selection_policy_resolver::<GuestCandidate>("MinimumUtilization").unwrap();
        assert_eq!(min.select(&candidates), Some(3));
        assert_eq!(min.select(&[]), None);
    }

    #[test]
    fn test_resolver_errors() {
        assert_eq!(
            selection_policy_resolver::<HostCandidate>("BestFit").err(),
            Some(ConfigurationError::UnknownSelectionPolicy("BestFit".to_string()))
        );
        assert!(matches!(
            selection_policy_resolver::<HostCandidate>("Random[seed=abc]").err(),
            Some(ConfigurationError::InvalidOption { .. })
        ));
        assert!(selection_policy_resolver::<HostCandidate>("Random[seed=7]").is_ok());
    }
}
