//! Implementations of selection policies.

pub mod first_fit;
pub mod maximum_usage;
pub mod minimum_utilization;
pub mod random;
