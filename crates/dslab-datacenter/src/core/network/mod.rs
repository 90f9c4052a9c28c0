//! Datacenter network: switches, packets and guest network interfaces.

pub mod nic;
pub mod packet;
pub mod switch;
pub mod topology;
