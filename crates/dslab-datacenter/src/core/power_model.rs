//! Physical host power consumption models.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use dyn_clone::{clone_trait_object, DynClone};
use serde::{Deserialize, Serialize};

use crate::core::error::ConfigurationError;

/// Power model is a function, which computes the power consumption of a physical host based on its CPU
/// utilization.
pub trait PowerModel: DynClone {
    /// Returns the power consumption in Watts.
    ///
    /// - `utilization` - host CPU utilization, values outside of [0, 1] are clamped.
    fn get_power(&self, utilization: f64) -> f64;
}

clone_trait_object!(PowerModel);

/// Dynamic part of the power consumption as a function of utilization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerModelShape {
    Linear,
    Square,
    Sqrt,
    Cubic,
}

impl PowerModelShape {
    fn scale(&self, utilization: f64) -> f64 {
        match self {
            PowerModelShape::Linear => utilization,
            PowerModelShape::Square => utilization.powi(2),
            PowerModelShape::Sqrt => utilization.sqrt(),
            PowerModelShape::Cubic => utilization.powi(3),
        }
    }
}

impl FromStr for PowerModelShape {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Ok(PowerModelShape::Linear),
            "square" => Ok(PowerModelShape::Square),
            "sqrt" => Ok(PowerModelShape::Sqrt),
            "cubic" => Ok(PowerModelShape::Cubic),
            _ => Err(ConfigurationError::UnknownPowerModel(s.to_string())),
        }
    }
}

impl Display for PowerModelShape {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let name = match self {
            PowerModelShape::Linear => "linear",
            PowerModelShape::Square => "square",
            PowerModelShape::Sqrt => "sqrt",
            PowerModelShape::Cubic => "cubic",
        };
        write!(f, "{}", name)
    }
}

/// Power model with a constant static part and a dynamic part of the given shape.
///
/// Power is computed as `static + (max - static) * shape(utilization)`, where `static = idle_fraction * max`.
/// An idle host still consumes its static power.
#[derive(Clone, Debug)]
pub struct ShapedPowerModel {
    shape: PowerModelShape,
    max_power: f64,
    static_power: f64,
}

impl ShapedPowerModel {
    /// Creates power model.
    ///
    /// - `max_power` - power consumed by the fully loaded host.
    /// - `idle_power_fraction` - fraction of `max_power` consumed by the idle host.
    pub fn new(shape: PowerModelShape, max_power: f64, idle_power_fraction: f64) -> Self {
        Self {
            shape,
            max_power,
            static_power: idle_power_fraction * max_power,
        }
    }

    pub fn linear(max_power: f64, idle_power_fraction: f64) -> Self {
        Self::new(PowerModelShape::Linear, max_power, idle_power_fraction)
    }

    pub fn max_power(&self) -> f64 {
        self.max_power
    }

    pub fn static_power(&self) -> f64 {
        self.static_power
    }
}

impl PowerModel for ShapedPowerModel {
    fn get_power(&self, utilization: f64) -> f64 {
        let utilization = utilization.clamp(0., 1.);
        self.static_power + (self.max_power - self.static_power) * self.shape.scale(utilization)
    }
}

/// Power model parameters as they appear in host configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerModelParams {
    pub shape: PowerModelShape,
    pub max_power: f64,
    pub idle_power_fraction: f64,
}

impl PowerModelParams {
    pub fn new(shape: PowerModelShape, max_power: f64, idle_power_fraction: f64) -> Self {
        Self {
            shape,
            max_power,
            idle_power_fraction,
        }
    }

    /// Parses the shape name and builds parameters from it.
    pub fn from_shape_name(shape: &str, max_power: f64, idle_power_fraction: f64) -> Result<Self, ConfigurationError> {
        Ok(Self::new(shape.parse()?, max_power, idle_power_fraction))
    }

    pub fn build(&self) -> Box<dyn PowerModel> {
        Box::new(ShapedPowerModel::new(self.shape, self.max_power, self.idle_power_fraction))
    }
}

impl Default for PowerModelParams {
    fn default() -> Self {
        Self::new(PowerModelShape::Linear, 250., 0.7)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_shapes() {
        let linear = ShapedPowerModel::new(PowerModelShape::Linear, 200., 0.5);
        let square = ShapedPowerModel::new(PowerModelShape::Square, 200., 0.5);
        let sqrt = ShapedPowerModel::new(PowerModelShape::Sqrt, 200., 0.5);
        let cubic = ShapedPowerModel::new(PowerModelShape::Cubic, 200., 0.5);
        assert_abs_diff_eq!(linear.get_power(0.5), 150., epsilon = 1e-9);
        assert_abs_diff_eq!(square.get_power(0.5), 125., epsilon = 1e-9);
        assert_abs_diff_eq!(sqrt.get_power(0.25), 150., epsilon = 1e-9);
        assert_abs_diff_eq!(cubic.get_power(0.5), 112.5, epsilon = 1e-9);
    }

    #[test]
    fn test_idle_and_full_power() {
        let model = PowerModelParams::new(PowerModelShape::Square, 300., 0.6).build();
        assert_abs_diff_eq!(model.get_power(0.), 180., epsilon = 1e-9);
        assert_abs_diff_eq!(model.get_power(1.), 300., epsilon = 1e-9);
        // out of range utilization is clamped
        assert_abs_diff_eq!(model.get_power(-0.5), 180., epsilon = 1e-9);
        assert_abs_diff_eq!(model.get_power(1.7), 300., epsilon = 1e-9);
    }

    #[test]
    fn test_parse_shape() {
        assert_eq!("Sqrt".parse::<PowerModelShape>().unwrap(), PowerModelShape::Sqrt);
        assert_eq!(
            "quadratic".parse::<PowerModelShape>(),
            Err(ConfigurationError::UnknownPowerModel("quadratic".to_string()))
        );
        assert!(PowerModelParams::from_shape_name("cubic", 100., 0.1).is_ok());
    }
}
