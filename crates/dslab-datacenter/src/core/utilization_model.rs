//! Resource utilization models.

use dyn_clone::{clone_trait_object, DynClone};
use serde::{Deserialize, Serialize};

use crate::core::error::ConfigurationError;

/// A utilization model is a function, which defines the fraction of requested CPU capacity used by a cloudlet
/// at the given simulation time.
///
/// Implementations must be pure: querying the same time twice returns the same value.
pub trait UtilizationModel: DynClone {
    fn get_utilization(&self, time: f64) -> f64;
}

clone_trait_object!(UtilizationModel);

/// Cloudlet uses all requested capacity all the time.
#[derive(Clone, Default)]
pub struct FullUtilizationModel;

impl FullUtilizationModel {
    pub fn new() -> Self {
        Self {}
    }
}

impl UtilizationModel for FullUtilizationModel {
    fn get_utilization(&self, _time: f64) -> f64 {
        1.
    }
}

/// The constant utilization.
#[derive(Clone)]
pub struct ConstantUtilizationModel {
    utilization: f64,
}

impl ConstantUtilizationModel {
    pub fn new(utilization: f64) -> Self {
        Self { utilization }
    }
}

impl UtilizationModel for ConstantUtilizationModel {
    fn get_utilization(&self, _time: f64) -> f64 {
        self.utilization
    }
}

/// How a trace is evaluated between two samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMode {
    /// Conventional linear interpolation between the bracketing samples.
    #[default]
    Linear,
    /// Reproduces the slope `(after - before) / ((before - after) * interval)` used by the microservice trace
    /// experiments, for comparison with their published outputs. Returns the earlier sample when both samples are
    /// equal, where that formula is undefined.
    Legacy,
}

const SAMPLE_TIME_TOLERANCE: f64 = 1e-9;

/// Utilization read from a trace sampled with a fixed interval.
#[derive(Clone)]
pub struct TraceUtilizationModel {
    samples: Vec<f64>,
    interval: f64,
    mode: InterpolationMode,
}

impl TraceUtilizationModel {
    /// Creates the model from samples taken every `interval` seconds starting at time 0.
    ///
    /// An empty trace is treated as a single zero sample.
    pub fn new(samples: Vec<f64>, interval: f64) -> Result<Self, ConfigurationError> {
        if !(interval > 0. && interval.is_finite()) {
            return Err(ConfigurationError::InvalidTraceInterval(interval));
        }
        let samples = if samples.is_empty() { vec![0.] } else { samples };
        Ok(Self {
            samples,
            interval,
            mode: InterpolationMode::Linear,
        })
    }

    /// Creates the model from per-process samples of a service running on `pes` processors, so that each sample
    /// is divided by the number of processors.
    pub fn from_service_trace(samples: Vec<f64>, interval: f64, pes: u32) -> Result<Self, ConfigurationError> {
        if pes == 0 {
            return Self::new(Vec::new(), interval);
        }
        Self::new(samples.into_iter().map(|s| s / pes as f64).collect(), interval)
    }

    pub fn with_interpolation(mut self, mode: InterpolationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Time covered by the trace.
    pub fn duration(&self) -> f64 {
        (self.samples.len() - 1) as f64 * self.interval
    }
}

impl UtilizationModel for TraceUtilizationModel {
    fn get_utilization(&self, time: f64) -> f64 {
        let time = time.max(0.);
        let position = time / self.interval;
        let last = self.samples.len() - 1;
        // sampling points are matched with a tolerance, `time / interval` is inexact for most intervals
        let nearest = position.round();
        if (nearest * self.interval - time).abs() <= SAMPLE_TIME_TOLERANCE * self.interval.max(1.) {
            return self.samples[(nearest as usize).min(last)];
        }
        let before = position.floor() as usize;
        if before >= last {
            return self.samples[last];
        }
        let after = before + 1;
        let (u_before, u_after) = (self.samples[before], self.samples[after]);
        let slope = match self.mode {
            InterpolationMode::Linear => (u_after - u_before) / self.interval,
            InterpolationMode::Legacy => {
                if u_before == u_after {
                    return u_before;
                }
                (u_after - u_before) / ((u_before - u_after) * self.interval)
            }
        };
        u_before + slope * (time - before as f64 * self.interval)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_exact_samples() {
        let samples = vec![0.1, 0.5, 0.3, 0.9, 0.0];
        let model = TraceUtilizationModel::new(samples.clone(), 5.).unwrap();
        for (i, sample) in samples.iter().enumerate() {
            assert_eq!(model.get_utilization(i as f64 * 5.), *sample);
        }
    }

    #[test]
    fn test_clamps_after_trace_end() {
        let model = TraceUtilizationModel::new(vec![0.1, 0.5, 0.7], 5.).unwrap();
        assert_eq!(model.get_utilization(10.), 0.7);
        assert_eq!(model.get_utilization(12.5), 0.7);
        assert_eq!(model.get_utilization(1e6), 0.7);
    }

    #[test]
    fn test_linear_interpolation() {
        let model = TraceUtilizationModel::new(vec![0.2, 0.6, 0.4], 5.).unwrap();
        assert_abs_diff_eq!(model.get_utilization(2.5), 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(model.get_utilization(1.), 0.28, epsilon = 1e-12);
        assert_abs_diff_eq!(model.get_utilization(7.5), 0.5, epsilon = 1e-12);
        // queries do not change the model
        assert_abs_diff_eq!(model.get_utilization(2.5), 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_legacy_interpolation() {
        let model = TraceUtilizationModel::new(vec![0.2, 0.6, 0.6], 5.)
            .unwrap()
            .with_interpolation(InterpolationMode::Legacy);
        // the legacy slope always equals -1 / interval when samples differ
        assert_abs_diff_eq!(model.get_utilization(2.5), 0.2 - 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(model.get_utilization(7.5), 0.6, epsilon = 1e-12);
        assert_eq!(model.get_utilization(5.), 0.6);
    }

    #[test]
    fn test_empty_and_per_pe_traces() {
        let empty = TraceUtilizationModel::new(Vec::new(), 5.).unwrap();
        assert_eq!(empty.get_utilization(0.), 0.);
        assert_eq!(empty.get_utilization(100.), 0.);

        let per_pe = TraceUtilizationModel::from_service_trace(vec![0.8, 1.6], 5., 2).unwrap();
        assert_eq!(per_pe.samples(), &[0.4, 0.8]);
        let no_pes = TraceUtilizationModel::from_service_trace(vec![0.8, 1.6], 5., 0).unwrap();
        assert_eq!(no_pes.samples(), &[0.]);
    }

    #[test]
    fn test_exact_samples_with_inexact_intervals() {
        let samples: Vec<f64> = (0..200).map(|i| ((i * 37) % 100) as f64 / 100.).collect();
        for interval in [0.3, 0.7, 1.1, 0.01, 2.3, 0.15, 300.7] {
            for mode in [InterpolationMode::Linear, InterpolationMode::Legacy] {
                let model = TraceUtilizationModel::new(samples.clone(), interval)
                    .unwrap()
                    .with_interpolation(mode);
                for (i, sample) in samples.iter().enumerate() {
                    assert_eq!(
                        model.get_utilization(i as f64 * interval),
                        *sample,
                        "interval {} sample {} mode {:?}",
                        interval,
                        i,
                        mode
                    );
                }
            }
        }
    }

    #[test]
    fn test_interpolation_with_inexact_interval() {
        let model = TraceUtilizationModel::new(vec![0.2, 0.6, 0.4], 0.3).unwrap();
        assert_abs_diff_eq!(model.get_utilization(0.15), 0.4, epsilon = 1e-9);
        assert_abs_diff_eq!(model.get_utilization(0.45), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_interval() {
        for interval in [0., -1., f64::NAN, f64::INFINITY] {
            assert!(matches!(
                TraceUtilizationModel::new(vec![0.5], interval),
                Err(ConfigurationError::InvalidTraceInterval(_))
            ));
        }
        assert!(TraceUtilizationModel::from_service_trace(vec![0.5], 0., 2).is_err());
    }
}
