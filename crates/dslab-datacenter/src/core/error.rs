//! Error types.

use thiserror::Error;

use crate::core::network::switch::SwitchLevel;

/// Invalid datacenter configuration, always detected before simulated time advances.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("unknown power model shape: {0}")]
    UnknownPowerModel(String),

    #[error("cannot attach {first} switch to {second} switch")]
    IncompatibleSwitchLevels { first: SwitchLevel, second: SwitchLevel },

    #[error("hosts can only be attached to edge switches, switch #{switch_id} is at {level} level")]
    HostAttachedToNonEdge { switch_id: u32, level: SwitchLevel },

    #[error("switch #{0} is not registered in datacenter")]
    UnknownSwitch(u32),

    #[error("host #{0} is not registered in datacenter")]
    UnknownHost(u32),

    #[error("switch #{switch_id} has only {ports} ports")]
    PortLimitExceeded { switch_id: u32, ports: u32 },

    #[error("migration thresholds must satisfy 0 <= lower <= upper <= 1, got lower={lower} upper={upper}")]
    InvalidThresholds { lower: f64, upper: f64 },

    #[error("unknown selection policy: {0}")]
    UnknownSelectionPolicy(String),

    #[error("invalid option `{option}` in {config}")]
    InvalidOption { config: String, option: String },

    #[error("utilization trace interval must be positive, got {0}")]
    InvalidTraceInterval(f64),

    #[error("can't load config: {0}")]
    InvalidConfig(String),
}

/// Packet refers to a sender which is not resident on the host that sends it.
///
/// Signals broken bookkeeping in the datacenter, the simulation can't continue after it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    #[error("sender guest #{guest_id} of packet is not found on host #{host_id}")]
    SenderNotFound { guest_id: u32, host_id: u32 },

    #[error("host #{host_id} sends packets outside but is not attached to any switch")]
    HostNotAttached { host_id: u32 },

    #[error("switch #{switch_id} has no route to host #{host_id}")]
    NoRoute { switch_id: u32, host_id: u32 },

    #[error("receiver guest #{guest_id} is not running on any host")]
    UnknownReceiver { guest_id: u32 },
}

/// Guest can not be mapped to a physical host.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlacementError {
    #[error("guest #{0} is not registered")]
    UnknownGuest(u32),

    #[error("guest #{0} is not placed")]
    NotPlaced(u32),

    #[error("placement of guest #{0} contains a cycle")]
    Cycle(u32),
}

/// Reasons for dropping an entry of a migration plan.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MigrationInconsistency {
    #[error("guest #{0} does not exist anymore")]
    GuestNotFound(u32),

    #[error("guest #{0} is already in migration")]
    AlreadyMigrating(u32),

    #[error("guest #{guest_id} is not placed on host #{host_id}")]
    WrongSource { guest_id: u32, host_id: u32 },

    #[error("target host #{0} is not found")]
    TargetNotFound(u32),

    #[error("target host #{host_id} can not accept guest #{guest_id}")]
    TargetNotSuitable { guest_id: u32, host_id: u32 },

    #[error("target host #{host_id} would be overloaded by guest #{guest_id}")]
    TargetOverloaded { guest_id: u32, host_id: u32 },
}
