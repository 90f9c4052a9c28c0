//! Simulation configuration.

pub mod options;
pub mod sim_config;
