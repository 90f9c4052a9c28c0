//! Datacenter model: resources, guests, network, allocation policies and the orchestrating component.

pub mod allocation_policy;
pub mod cloudlet;
pub mod cloudlet_scheduler;
pub mod common;
pub mod config;
pub mod datacenter;
pub mod energy_meter;
pub mod error;
pub mod events;
pub mod guest;
pub mod guest_scheduler;
pub mod host;
pub mod network;
pub mod power_model;
pub mod provisioner;
pub mod resource_pool;
pub mod selection_policies;
pub mod selection_policy;
pub mod utilization_model;
