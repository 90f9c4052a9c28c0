//! Energy meter calculates the energy consumption.

use serde::Serialize;

/// Cumulative energy consumption observed at a processing update.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnergyRecord {
    pub time: f64,
    pub energy: f64,
}

/// Energy meter structure.
///
/// Power sampled at time `t` is assumed to be consumed during the whole interval since the previous sample.
#[derive(Debug, Clone, Default)]
pub struct EnergyMeter {
    energy_consumed: f64,
    current_power: f64,
    prev_time: f64,
}

impl EnergyMeter {
    /// Creates component.
    pub fn new() -> Self {
        Self {
            prev_time: 0.0,
            current_power: 0.0,
            energy_consumed: 0.0,
        }
    }

    /// Invoked at each processing update with the power observed at `time`.
    pub fn update(&mut self, time: f64, power: f64) {
        if time > self.prev_time {
            self.energy_consumed += (time - self.prev_time) * power;
            self.prev_time = time;
        }
        self.current_power = power;
    }

    /// Returns the total energy consumption in Joules.
    pub fn energy_consumed(&self) -> f64 {
        self.energy_consumed
    }

    /// Returns the latest sampled power in Watts.
    pub fn current_power(&self) -> f64 {
        self.current_power
    }

    pub fn last_update_time(&self) -> f64 {
        self.prev_time
    }
}
